//! Metrics Exposition Server
//!
//! HTTP endpoint scraped by Prometheus and by the load balancer's controller.

use super::ServerError;
use crate::adapters::outbound::{MetricRegistry, RegistryError};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// HTTP server for `/metrics` and `/health`.
pub struct MetricsServer {
    listener: TcpListener,
    registry: Arc<MetricRegistry>,
}

impl MetricsServer {
    /// Bind the metrics listener. Fails if the address is unavailable.
    pub async fn bind(addr: SocketAddr, registry: Arc<MetricRegistry>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Build the router. Exposed for in-process tests.
    pub fn router(registry: Arc<MetricRegistry>) -> Router {
        Router::new()
            .route("/metrics", any(metrics_handler))
            .route("/health", any(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(registry)
    }

    /// Serve scrapes until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        tracing::info!("metrics endpoint listening on {}", addr);

        axum::serve(self.listener, Self::router(self.registry))
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("metrics endpoint stopped");
        Ok(())
    }
}

// Handler functions

async fn metrics_handler(State(registry): State<Arc<MetricRegistry>>) -> Response {
    metrics_response(registry.render())
}

fn metrics_response(rendered: Result<String, RegistryError>) -> Response {
    match rendered {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render metrics").into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
