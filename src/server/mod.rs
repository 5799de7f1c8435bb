mod event_routes;
pub mod metrics;

pub use event_routes::{event_routes, EventsState};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Serve the admin routes on `port` until `shutdown` is cancelled.
pub async fn run_server(state: EventsState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = event_routes(state);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind admin server on port {}", port))?;
    info!("Admin server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
