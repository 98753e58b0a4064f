//! Realm server entry point.

use anyhow::bail;
use realm_server::app::Application;
use realm_server::cli::CliArgs;
use realm_server::config::AppConfig;
use realm_server::logging::setup_logging;
use tracing::error;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    config.apply_cli(&args);
    if let Err(e) = config.validate() {
        bail!("Configuration validation failed: {}", e);
    }

    setup_logging(&config.logging)?;

    if let Err(e) = Application::new(config).run().await {
        error!("❌ Application error: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}
