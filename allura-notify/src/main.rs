use std::sync::Arc;

use allura_notify::NotifyPipeline;
use allura_notify::config::PipelineConfig;
use allura_notify::identity::InMemoryUserDirectory;
use allura_notify::logging;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = PipelineConfig::from_env_or_default()?;
    let (log_handle, _guard) = logging::init_logging(&config.log_dir)?;

    let users = Arc::new(InMemoryUserDirectory::new());
    let pipeline = NotifyPipeline::from_config(config, users)?;
    log_handle.spawn_retention(pipeline.cancellation_token());
    pipeline.start();

    info!(
        log_dir = %log_handle.log_dir().display(),
        filter = %log_handle.filter(),
        "allura-notify running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    pipeline.shutdown().await?;

    Ok(())
}
