//! HTTP exposition of the exporter metrics.
//!
//! Serves `GET /metrics` in the Prometheus text format. Scrapes only read
//! the registry; they never trigger an nftables query.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;
use crate::metrics::ExporterMetrics;

/// Listen address of the metrics server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsServerConfig {
    pub listen_addr: SocketAddr,
}

/// Binds the listener up front so address errors surface before collection
/// starts.
pub async fn bind_metrics_listener(config: &MetricsServerConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(address = %listener.local_addr()?, "Metrics server listening");
    Ok(listener)
}

pub fn router(metrics: Arc<ExporterMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serves scrapes until the task is dropped or the listener fails.
pub async fn serve(listener: TcpListener, metrics: Arc<ExporterMetrics>) -> Result<()> {
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

async fn metrics_handler(State(metrics): State<Arc<ExporterMetrics>>) -> Response {
    match metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
