//! gRPC Server - BackendService transport
//!
//! Maps the three RPCs onto the request simulator. Every call holds an
//! in-flight guard and gets a cancellation scope from the shutdown
//! controller; telemetry is added by `RpcMetricsLayer` around the server.

use super::{RpcMetricsLayer, ServerError};
use crate::application::RpcInterceptor;
use crate::domain::entities::ServingStatus;
use crate::domain::services::{RequestSimulator, SimulationError};
use crate::infrastructure::ShutdownController;
use crate::proto::{
    self, BackendService, BackendServiceServer, GetResourceRequest, GetResourceResponse,
    HealthCheckRequest, HealthCheckResponse, ProcessDataRequest, ProcessDataResponse,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// Default time in-flight calls get to finish once shutdown starts.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

impl From<SimulationError> for Status {
    fn from(err: SimulationError) -> Self {
        match err {
            SimulationError::Cancelled => Status::cancelled(err.to_string()),
        }
    }
}

fn serving_status(status: ServingStatus) -> proto::ServingStatus {
    match status {
        ServingStatus::Unknown => proto::ServingStatus::Unknown,
        ServingStatus::Serving => proto::ServingStatus::Serving,
        ServingStatus::NotServing => proto::ServingStatus::NotServing,
    }
}

/// BackendService implementation.
#[derive(Clone)]
pub struct BackendGrpcService {
    simulator: Arc<RequestSimulator>,
    shutdown: ShutdownController,
}

impl BackendGrpcService {
    pub fn new(simulator: Arc<RequestSimulator>, shutdown: ShutdownController) -> Self {
        Self {
            simulator,
            shutdown,
        }
    }
}

#[tonic::async_trait]
impl BackendService for BackendGrpcService {
    async fn process_data(
        &self,
        request: Request<ProcessDataRequest>,
    ) -> Result<Response<ProcessDataResponse>, Status> {
        let req = request.into_inner();
        let _guard = self.shutdown.call_guard();
        let ctx = self.shutdown.call_context();

        let processed = self
            .simulator
            .process_data(&ctx, &req.data, req.complexity)
            .await?;

        Ok(Response::new(ProcessDataResponse {
            result: processed.result,
            processing_time_ms: processed.processing_time_ms,
            pod_id: processed.pod_id,
        }))
    }

    async fn get_resource(
        &self,
        request: Request<GetResourceRequest>,
    ) -> Result<Response<GetResourceResponse>, Status> {
        let req = request.into_inner();
        let _guard = self.shutdown.call_guard();
        let ctx = self.shutdown.call_context();

        let resource = self
            .simulator
            .get_resource(&ctx, &req.resource_id, req.simulate_slow_operation)
            .await?;

        Ok(Response::new(GetResourceResponse {
            resource_data: resource.resource_data,
            metadata: resource.metadata,
            pod_id: resource.pod_id,
        }))
    }

    async fn health_check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let _guard = self.shutdown.call_guard();
        let report = self.simulator.health_check();

        Ok(Response::new(HealthCheckResponse {
            status: serving_status(report.status) as i32,
            pod_id: report.pod_id,
        }))
    }
}

/// gRPC listener serving BackendService plus v1 reflection.
pub struct GrpcServer {
    listener: TcpListener,
    service: BackendGrpcService,
    interceptor: RpcInterceptor,
    drain_timeout: Duration,
}

impl GrpcServer {
    /// Bind the gRPC listener. Fails if the address is unavailable.
    ///
    /// `interceptor` observes every call the server handles, reflection
    /// included.
    pub async fn bind(
        addr: SocketAddr,
        service: BackendGrpcService,
        interceptor: RpcInterceptor,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            service,
            interceptor,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    /// Override how long in-flight calls may run after shutdown starts.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the shutdown controller fires.
    ///
    /// Returns once the listener is closed and in-flight calls have
    /// finished, then marks the controller drained. Calls still running
    /// when the drain timeout expires are cancelled and answer `Cancelled`.
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        let controller = self.service.shutdown.clone();

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(proto::FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let watchdog = tokio::spawn({
            let controller = controller.clone();
            let timeout = self.drain_timeout;
            async move {
                controller.wait_for_shutdown().await;
                if !controller.wait_for_drain(timeout).await {
                    controller.cancel_calls();
                }
            }
        });

        let signal = {
            let controller = controller.clone();
            async move {
                controller.wait_for_shutdown().await;
                tracing::info!(
                    "gRPC server draining {} in-flight calls",
                    controller.active_calls()
                );
            }
        };

        tracing::info!("gRPC server listening on {}", addr);

        let result = Server::builder()
            .layer(RpcMetricsLayer::new(self.interceptor))
            .add_service(reflection)
            .add_service(BackendServiceServer::new(self.service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(self.listener), signal)
            .await;

        watchdog.abort();
        controller.mark_drained();
        result?;

        tracing::info!("gRPC server stopped");
        Ok(())
    }
}
