pub mod chat;
pub mod config;
pub mod db;
pub mod llm;
pub mod relay;
pub mod stream;
pub mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use config::Config;
use db::Database;
use relay::RelayState;

/// Opens the store and serves the relay until SIGINT/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let db = Arc::new(Database::open(&config.database_path)?);
    info!(path = %config.database_path.display(), "database ready");

    if config.gateway_key.is_empty() {
        warn!("no gateway key configured; chat requests will fail until one is set");
    }

    let addr: SocketAddr = config.bind_address.parse()?;
    let app = relay::build_router(RelayState::new(config, db));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
