//! Inbound adapters: the gRPC service, its metrics layer and the metrics
//! endpoint.

mod grpc_server;
mod metrics_server;
mod rpc_metrics_layer;

use std::net::SocketAddr;

pub use grpc_server::{BackendGrpcService, GrpcServer, DEFAULT_DRAIN_TIMEOUT};
pub use metrics_server::{MetricsServer, PROMETHEUS_CONTENT_TYPE};
pub use rpc_metrics_layer::{RpcMetricsLayer, RpcMetricsService};

/// Listener failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("reflection service error: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),
}
