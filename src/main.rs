pub mod clock;
pub mod config;
pub mod network;
pub mod publisher;
pub mod sensor;
pub mod telemetry;

use color_eyre::{eyre::eyre, Result};
use config::PublisherConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    let config_path = PublisherConfig::resolve_path()?;
    PublisherConfig::ensure_default_config(&config_path).await?;
    let config = PublisherConfig::load(&config_path).await?;
    info!("Using configuration {}", config_path.display());

    let publisher = publisher::assemble(&config)
        .map_err(|e| eyre!("Failed to assemble publisher: {}", e))?;

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => {
                error!("Unable to listen for shutdown signal: {}", e);
                return;
            }
        }
        ctrl_c_token.cancel();
    });

    let stats = publisher
        .start()
        .await
        .run_until_cancelled(token)
        .await
        .shutdown()
        .await;

    info!("Final statistics: {}", stats);
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
