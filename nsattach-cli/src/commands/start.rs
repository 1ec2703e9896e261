use clap::Args;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Name of the container to start
    pub name: String,

    /// Init command; defaults to lxc.init.cmd, then /sbin/init
    #[arg(last = true)]
    pub command: Vec<String>,
}

pub async fn execute(args: StartArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let host = global.create_host()?;
    let container = global.container(&host, &args.name).await?;

    container.start(&args.command).await?;

    println!("{}", args.name);
    Ok(())
}
