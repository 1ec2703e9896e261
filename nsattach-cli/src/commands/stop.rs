use clap::Args;

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Name of the container(s) to stop
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: StopArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let host = global.create_host()?;

    let mut errors = Vec::new();
    let mut success_count = 0;

    for target in args.targets {
        let container = match global.container(&host, &target).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {}", e);
                errors.push(format!("{}: not found", target));
                continue;
            }
        };

        if let Err(e) = container.stop().await {
            eprintln!("Error stopping container '{}': {}", target, e);
            errors.push(format!("{}: {}", target, e));
        } else {
            println!("{}", target);
            success_count += 1;
        }
    }

    if !errors.is_empty() {
        let error_summary = if success_count > 0 {
            format!(
                "Failed to stop {} of {} container(s)",
                errors.len(),
                errors.len() + success_count
            )
        } else {
            format!("Failed to stop all {} container(s)", errors.len())
        };

        anyhow::bail!("{}\nErrors:\n  {}", error_summary, errors.join("\n  "));
    }
    Ok(())
}
