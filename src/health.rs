//! Liveness endpoint for the hosting platform.
//!
//! Runs alongside the bot and answers independently of Telegram or the
//! database, so a stuck poll loop does not take the process down with it.

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;

/// GET /
async fn index() -> &'static str {
    "bot is running"
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

/// Build the health routes.
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
}

/// Serve the health routes on an already bound listener.
pub async fn serve_on(listener: TcpListener) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Health server started");
    }
    axum::serve(listener, health_routes()).await
}

/// Bind `0.0.0.0:<port>` and serve until the process exits.
pub async fn serve(port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    serve_on(listener).await
}
