//! `nsattach`: manage directory-backed containers and run processes in them.

mod cli;
mod commands;
mod terminal;

use clap::Parser;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    nsattach::init_logging(cli.global.log_level.as_deref());

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let local = tokio::task::LocalSet::new();
    let code = match local.block_on(&runtime, run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    // A blocked read on our stdin must not hold up exit
    runtime.shutdown_background();
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let global = &cli.global;
    match cli.command {
        Commands::Create(args) => commands::create::execute(args, global).await?,
        Commands::Start(args) => commands::start::execute(args, global).await?,
        Commands::Stop(args) => commands::stop::execute(args, global).await?,
        Commands::Destroy(args) => commands::destroy::execute(args, global).await?,
        Commands::Clone(args) => commands::clone::execute(args, global).await?,
        Commands::Attach(args) => return commands::attach::execute(args, global).await,
        Commands::Config(args) => commands::config::execute(args, global).await?,
        Commands::Cgroup(args) => commands::cgroup::execute(args, global).await?,
        Commands::Cat(args) => commands::cat::execute(args, global).await?,
        Commands::Info(args) => commands::info::execute(args, global).await?,
        Commands::Version => commands::version::execute(),
    }
    Ok(0)
}
