use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use nsattach::{Container, GetOptions, Host, HostOptions};

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "nsattach", version, about = "Run processes inside Linux containers")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Directory holding the containers
    #[arg(long, global = true, env = "NSATTACH_LXCPATH")]
    pub lxcpath: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "nsattach=trace"
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

impl GlobalFlags {
    pub fn host_options(&self) -> anyhow::Result<HostOptions> {
        let mut options = HostOptions::from_env()?;
        if let Some(lxcpath) = &self.lxcpath {
            let lxcpath = std::path::absolute(lxcpath)
                .with_context(|| format!("invalid lxcpath {}", lxcpath.display()))?;
            options = options.with_lxcpath(lxcpath);
        }
        Ok(options)
    }

    /// Must be called inside the `LocalSet` driving the command.
    pub fn create_host(&self) -> anyhow::Result<Host> {
        Ok(Host::new(self.host_options()?)?)
    }

    /// Look up a container that must already be defined.
    pub async fn container(&self, host: &Host, name: &str) -> anyhow::Result<Container> {
        Ok(host.get_container(name, GetOptions::default()).await?)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Define a new container
    Create(commands::create::CreateArgs),

    /// Start a container's init
    Start(commands::start::StartArgs),

    /// Stop one or more containers
    Stop(commands::stop::StopArgs),

    /// Remove one or more containers
    Destroy(commands::destroy::DestroyArgs),

    /// Copy a stopped container
    Clone(commands::clone::CloneArgs),

    /// Run a command inside a running container
    Attach(commands::attach::AttachArgs),

    /// Read and change container configuration
    Config(commands::config::ConfigArgs),

    /// Read and change cgroup items of a running container
    Cgroup(commands::cgroup::CgroupArgs),

    /// Print a file as seen from inside a container
    Cat(commands::cat::CatArgs),

    /// Show container details as JSON
    Info(commands::info::InfoArgs),

    /// Print the library version
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["nsattach", "info", "web", "--lxcpath", "/tmp/lxc"]).unwrap();
        assert_eq!(cli.global.lxcpath, Some(PathBuf::from("/tmp/lxc")));
    }

    #[test]
    fn test_relative_lxcpath_is_made_absolute() {
        let global = GlobalFlags {
            lxcpath: Some(PathBuf::from("relative/lxc")),
            log_level: None,
        };
        assert!(global.host_options().unwrap().lxcpath.is_absolute());
    }
}
