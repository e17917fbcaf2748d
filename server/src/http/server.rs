use anyhow::Result;
use axum::{Router, routing::get};
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::{handlers, state::AppState};
use crate::service::FileService;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // File CRUD operations
        .route("/files", get(handlers::list_files))
        .route(
            "/files/*path",
            get(handlers::get_file)
                .post(handlers::create_file)
                .put(handlers::update_file)
                .delete(handlers::delete_file),
        )
        // Add state
        .with_state(state)
        // Add middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` fires, then drain requests and close the store.
pub async fn start_server(
    files: FileService,
    bind_address: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let app_state = Arc::new(AppState::new(files, shutdown.clone()));
    let app = router(Arc::clone(&app_state));

    info!("Server listening on {}", bind_address);

    // Run the server
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped, closing store");
    if let Err(err) = app_state.files.close().await {
        warn!(error = %err, "failed to close store");
    }

    Ok(())
}
