use clap::{Args, Subcommand};

#[derive(Args, Debug)]
pub struct CgroupArgs {
    #[command(subcommand)]
    pub command: CgroupCommand,
}

#[derive(Subcommand, Debug)]
pub enum CgroupCommand {
    /// Print a cgroup item, e.g. memory.max
    Get { name: String, key: String },

    /// Write a cgroup item
    Set {
        name: String,
        key: String,
        value: String,
    },
}

pub async fn execute(args: CgroupArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let host = global.create_host()?;

    match args.command {
        CgroupCommand::Get { name, key } => {
            let container = global.container(&host, &name).await?;
            println!("{}", container.get_cgroup_item(&key)?);
        }
        CgroupCommand::Set { name, key, value } => {
            let container = global.container(&host, &name).await?;
            container.set_cgroup_item(&key, &value)?;
        }
    }
    Ok(())
}
