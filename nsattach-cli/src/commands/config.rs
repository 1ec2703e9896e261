use std::path::PathBuf;

use clap::{Args, Subcommand};
use nsattach::ConfigValue;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print a configuration value; list values print one per line
    Get {
        name: String,
        /// Key, with or without the "lxc." prefix
        key: String,
        /// Read the configuration the container was started with
        #[arg(long)]
        running: bool,
    },

    /// Replace a value; several values set every entry of a list key
    Set {
        name: String,
        key: String,
        #[arg(required = true, num_args = 1..)]
        values: Vec<String>,
        /// Append to a list key instead of replacing it
        #[arg(short, long)]
        append: bool,
    },

    /// Remove a key and its sub-keys
    Clear { name: String, key: String },

    /// List supported keys
    Keys { name: String },

    /// Replace the configuration with the contents of a file
    Load {
        name: String,
        /// Defaults to the container's own config file
        file: Option<PathBuf>,
    },

    /// Write the configuration to a file
    Save {
        name: String,
        /// Defaults to the container's own config file
        file: Option<PathBuf>,
    },
}

pub async fn execute(args: ConfigArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let host = global.create_host()?;

    match args.command {
        ConfigCommand::Get { name, key, running } => {
            let container = global.container(&host, &name).await?;
            let value = if running {
                ConfigValue::from(container.get_running_config_item(&key)?)
            } else {
                container.get_config_item(&key)?
            };
            println!("{}", value);
        }
        ConfigCommand::Set {
            name,
            key,
            values,
            append,
        } => {
            let container = global.container(&host, &name).await?;
            if append {
                for value in &values {
                    container.append_config_item(&key, value)?;
                }
            } else {
                container.set_config_item(&key, values)?;
            }
            container.save_config(None).await?;
        }
        ConfigCommand::Clear { name, key } => {
            let container = global.container(&host, &name).await?;
            container.clear_config_item(&key)?;
            container.save_config(None).await?;
        }
        ConfigCommand::Keys { name } => {
            let container = global.container(&host, &name).await?;
            for key in container.config_keys() {
                println!("{}", key);
            }
        }
        ConfigCommand::Load { name, file } => {
            let container = global.container(&host, &name).await?;
            container.load_config(file.as_deref()).await?;
            container.save_config(None).await?;
        }
        ConfigCommand::Save { name, file } => {
            let container = global.container(&host, &name).await?;
            container.save_config(file.as_deref()).await?;
        }
    }
    Ok(())
}
