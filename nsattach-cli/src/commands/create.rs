use clap::Args;
use nsattach::GetOptions;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Template to populate the root filesystem with
    #[arg(short, long)]
    pub template: Option<String>,

    /// Backing store type (only "dir" is supported)
    #[arg(short = 'B', long)]
    pub backing_store: Option<String>,

    /// Name of the new container
    pub name: String,

    /// Arguments passed to the template
    #[arg(last = true)]
    pub template_args: Vec<String>,
}

pub async fn execute(args: CreateArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let host = global.create_host()?;
    let options = GetOptions {
        defined: false,
        ..Default::default()
    };
    let container = host.get_container(&args.name, options).await?;

    container
        .create(
            args.template.as_deref(),
            args.backing_store.as_deref(),
            &args.template_args,
        )
        .await?;

    println!("{}", args.name);
    Ok(())
}
