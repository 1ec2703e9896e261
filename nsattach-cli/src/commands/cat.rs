use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use nix::unistd::{getegid, geteuid};
use nsattach::OpenOptions;

#[derive(Args, Debug)]
pub struct CatArgs {
    /// User id to open the file as; defaults to ours
    #[arg(short = 'u', long)]
    pub uid: Option<u32>,

    /// Group id to open the file as; defaults to ours
    #[arg(short = 'g', long)]
    pub gid: Option<u32>,

    /// Name of the running container
    pub name: String,

    /// Path inside the container
    pub path: PathBuf,
}

pub async fn execute(args: CatArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let host = global.create_host()?;
    let container = global.container(&host, &args.name).await?;

    let options = OpenOptions {
        uid: args.uid.unwrap_or_else(|| geteuid().as_raw()),
        gid: args.gid.unwrap_or_else(|| getegid().as_raw()),
        ..OpenOptions::from_flags("r")?
    };
    let mut file = container
        .open_file(&args.path, options)
        .await
        .with_context(|| format!("{}: {}", args.name, args.path.display()))?;

    let mut stdout = std::io::stdout().lock();
    std::io::copy(&mut file, &mut stdout)?;
    stdout.flush()?;
    Ok(())
}
