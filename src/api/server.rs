//! HTTP server lifecycle.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::core::AppResult;
use crate::service::AdmissionService;

use super::routes::routes;

/// Bind to `config`'s address and serve until SIGINT, SIGTERM, or
/// [`AdmissionService::shutdown`].
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(config: &ServerConfig, service: Arc<AdmissionService>) -> AppResult<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    serve_listener(listener, service).await
}

/// Serve on an already-bound listener.
///
/// Parked requests are cancelled as soon as shutdown starts; running jobs
/// are allowed to finish.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve_listener(
    listener: TcpListener,
    service: Arc<AdmissionService>,
) -> AppResult<()> {
    let addr = listener.local_addr()?;
    let shutdown = service.shutdown_token();
    let app = routes(Arc::clone(&service));

    info!(%addr, "starting admission server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    service.shutdown();
    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
        () = token.cancelled() => info!("shutdown requested"),
    }
    // Wake parked waiters so in-flight requests can drain.
    token.cancel();
}
