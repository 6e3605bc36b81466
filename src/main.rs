use clap::Parser;

use kvcache::cli::{Cli, execute_command, init_logger_from_settings, load_and_merge_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = load_and_merge_config(&cli)?;
    init_logger_from_settings(&settings)?;

    tracing::debug!(
        version = kvcache::pkg_version(),
        aliases = settings.caches.len(),
        "Configuration loaded"
    );

    execute_command(&cli, settings).await?;

    Ok(())
}
