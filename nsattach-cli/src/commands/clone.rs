use std::path::PathBuf;

use clap::Args;
use nsattach::CloneOptions;

#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Container to copy; must be stopped
    pub source: String,

    /// Name of the copy
    pub name: String,

    /// Container path of the copy; defaults to the source's
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Backing store type (only "dir" is supported)
    #[arg(short = 'B', long)]
    pub backing_store: Option<String>,

    /// Size of the new backing store in bytes
    #[arg(long, default_value_t = 0)]
    pub size: u64,

    /// Keep the source's hostname
    #[arg(long)]
    pub keep_name: bool,

    /// Keep the source's network MAC addresses
    #[arg(long)]
    pub keep_mac: bool,
}

pub async fn execute(args: CloneArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let host = global.create_host()?;
    let source = global.container(&host, &args.source).await?;

    let path = args.path.map(std::path::absolute).transpose()?;
    let options = CloneOptions {
        path,
        backing_store: args.backing_store,
        size: args.size,
        snapshot: false,
        keep_name: args.keep_name,
        keep_mac: args.keep_mac,
    };
    let copy = source.clone_to(&args.name, options).await?;

    println!("{}", copy.name());
    Ok(())
}
