//! backend-pod - synthetic gRPC backend with per-pod telemetry
//!
//! This is the composition root that wires together all the components.

use anyhow::Context;
use backend_pod::adapters::inbound::{BackendGrpcService, GrpcServer, MetricsServer};
use backend_pod::adapters::outbound::{
    HeapMemorySource, MetricRegistry, PrometheusMetricsStore, StdRngJitter, TrackingAllocator,
};
use backend_pod::application::RpcInterceptor;
use backend_pod::config::{load_config, warn_rejected};
use backend_pod::domain::entities::PodProfile;
use backend_pod::domain::services::RequestSimulator;
use backend_pod::infrastructure::{shutdown_signal, ShutdownController, SystemSampler};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cfg, rejected) = load_config();

    tracing_subscriber::fmt()
        .with_max_level(cfg.log_level())
        .with_span_events(FmtSpan::CLOSE)
        .init();

    warn_rejected(&rejected);

    tracing::info!(
        "starting backend pod {} (cpu_factor={}, latency_base={}ms)",
        cfg.pod_id,
        cfg.cpu_factor,
        cfg.latency_base_ms
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapters
    let registry = Arc::new(MetricRegistry::new());
    registry
        .register_process_collector()
        .context("failed to register process metrics")?;
    let store = Arc::new(
        PrometheusMetricsStore::new(registry.clone(), cfg.pod_id.clone())
            .context("failed to register metric families")?,
    );
    let profile = Arc::new(PodProfile::new(
        cfg.pod_id.clone(),
        cfg.cpu_factor,
        cfg.latency_base_ms,
    ));
    let simulator = Arc::new(RequestSimulator::new(
        profile,
        Arc::new(StdRngJitter::from_time()),
    ));

    // 2. Application services
    let controller = ShutdownController::new();
    let interceptor = RpcInterceptor::new(store.clone());
    let service = BackendGrpcService::new(simulator, controller.clone());

    // 3. Inbound adapters. Both listeners bind before anything is served.
    let grpc = GrpcServer::bind(cfg.grpc_addr(), service, interceptor)
        .await?
        .with_drain_timeout(Duration::from_secs(cfg.shutdown_drain_timeout_secs));
    let metrics = MetricsServer::bind(cfg.metrics_addr(), registry).await?;

    // 4. Background tasks. Scrapes and sampling continue until the gRPC
    // drain has finished.
    let sampler = SystemSampler::new(store, Arc::new(HeapMemorySource::new()))
        .spawn(controller.wait_for_drained());

    let metrics_task = tokio::spawn(metrics.serve(controller.wait_for_drained()));

    tokio::spawn(shutdown_signal(controller.clone()));

    // 5. Serve gRPC until the drain completes
    grpc.serve().await?;

    if let Err(e) = sampler.await {
        tracing::warn!("system sampler task failed: {}", e);
    }
    match metrics_task.await {
        Ok(result) => result?,
        Err(e) => tracing::warn!("metrics endpoint task failed: {}", e),
    }

    tracing::info!("backend pod {} shut down", cfg.pod_id);
    Ok(())
}
