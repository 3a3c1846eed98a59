use std::future::Future;
use std::io;
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::context::ExporterContext;
use crate::error::Result;

pub const IDENTIFICATION: &str = "prometheus-gmail-exporter";

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub fn router(context: ExporterContext) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(context)
}

/// Binds the listener up front so a bad port fails before authorization starts.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("prometheus-gmail-exporter listening on http://{}", addr);
    Ok(listener)
}

/// Serves until the shutdown signal flips.
pub async fn serve(
    listener: TcpListener,
    context: ExporterContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, router(context))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}

/// Flips the shutdown channel once `signal` fires. If the signal cannot be
/// listened for, the sender is held forever: a dropped sender wakes every
/// receiver.
pub async fn forward_shutdown_signal<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Ctrl+C, bye!");
            let _ = shutdown.send(true);
        }
        Err(e) => {
            error!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn index_handler() -> &'static str {
    IDENTIFICATION
}

async fn readyz_handler(State(context): State<ExporterContext>) -> impl IntoResponse {
    let reason = context.readiness.reason();

    if reason.is_empty() {
        (StatusCode::OK, String::new())
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, reason)
    }
}

async fn metrics_handler(State(context): State<ExporterContext>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        context.registry.render(),
    )
}
