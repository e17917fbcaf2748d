use anyhow::{Context, Result};
use server::{config::ServerConfig, http, service::FileService};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    info!("Starting file store server");

    let registrar = store::default_registrar();
    info!(schemes = ?registrar.schemes(), "Registered store backends");

    let store = registrar
        .new_store(&config.store_url)
        .await
        .context("failed to open the configured store (STORE_URL)")?;
    info!("Using store: {}", store);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        info!("Shutdown requested");
        signal.cancel();
    });

    // Start the HTTP server
    http::start_server(FileService::new(store), config.bind_address, shutdown).await?;

    Ok(())
}
