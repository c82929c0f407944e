//! RPC surface for the notebook cell execution runtime.
//!
//! A thin adapter over `notebook-core`: binds the five RPC methods onto
//! HTTP routes and wires up the process-wide session manager.
//!
//! # Architecture
//!
//! - **AppState**: the session manager plus shared configuration, handed
//!   to every route handler.
//! - **protocol**: request/response DTOs, one pair per RPC method.
//! - **routes**: the axum router and its handlers.

pub mod error;
pub mod protocol;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use notebook_core::assets::ObjectStoreAssetFetcher;
use notebook_core::{Config, SessionManager};

pub use error::{ServerError, ServerResult};
pub use routes::{create_router, AppState};

/// Start the notebook server, binding to `config.bind_address` and serving
/// until interrupted.
pub async fn serve(config: Config) -> ServerResult<()> {
    let config = Arc::new(config);

    let fetcher = ObjectStoreAssetFetcher::from_config(&config)?;
    let manager = SessionManager::new(fetcher, config.clone());
    let state = Arc::new(AppState { manager, config: config.clone() });

    let app = create_router(state);

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|_| ServerError::BadRequest(format!("invalid bind address: {}", config.bind_address)))?;

    tracing::info!(%addr, "starting notebook server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Core(notebook_core::Error::Io(e)))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await
        .map_err(|e| ServerError::Core(notebook_core::Error::Io(e)))?;

    tracing::info!("notebook server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serve_rejects_unparseable_bind_address() {
        let mut config = Config::default();
        config.bind_address = "not-an-address".to_string();
        let result = serve(config).await;
        assert!(result.is_err());
    }
}
