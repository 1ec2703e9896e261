use std::path::PathBuf;

use clap::Args;
use nsattach::ContainerState;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Name of the container
    pub name: String,
}

#[derive(Serialize, Debug)]
struct ContainerInfo {
    name: String,
    lxcpath: PathBuf,
    state: ContainerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
}

pub async fn execute(args: InfoArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let host = global.create_host()?;
    let container = global.container(&host, &args.name).await?;

    let info = ContainerInfo {
        name: container.name().to_string(),
        lxcpath: container.lxcpath().to_path_buf(),
        state: container.state(),
        pid: container.init_pid(),
        hostname: container
            .get_config_item("uts.name")
            .ok()
            .map(|value| value.to_string())
            .filter(|name| !name.is_empty()),
    };

    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
