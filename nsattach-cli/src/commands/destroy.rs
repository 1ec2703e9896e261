use clap::Args;

#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Stop running containers before removing them
    #[arg(short, long)]
    pub force: bool,

    /// Name of the container(s) to remove
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: DestroyArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let host = global.create_host()?;

    let mut errors = Vec::new();
    for target in args.targets {
        let container = match global.container(&host, &target).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {}", e);
                errors.push(format!("{}: not found", target));
                continue;
            }
        };

        if args.force
            && container.is_running()
            && let Err(e) = container.stop().await
        {
            eprintln!("Error stopping container '{}': {}", target, e);
            errors.push(format!("{}: {}", target, e));
            continue;
        }

        if let Err(e) = container.destroy().await {
            eprintln!("Error removing container '{}': {}", target, e);
            errors.push(format!("{}: {}", target, e));
        } else {
            println!("{}", target);
        }
    }

    if !errors.is_empty() {
        anyhow::bail!(
            "Some containers could not be removed\nErrors:\n  {}",
            errors.join("\n  ")
        );
    }
    Ok(())
}
