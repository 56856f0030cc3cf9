//! Reference backend: the REST contract over an in-memory list.

pub mod routes;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;

pub use routes::{TodoBoard, todo_routes};

/// Bind `0.0.0.0:<port>` and serve a seeded board until Ctrl-C.
pub async fn serve(config: &ServerConfig) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Todo backend listening");

    axum::serve(listener, todo_routes(TodoBoard::seeded()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down backend");
        })
        .await
}
