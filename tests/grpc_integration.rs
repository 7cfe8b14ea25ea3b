//! Integration tests for the backend pod
//!
//! Tests real gRPC and HTTP listeners on ephemeral ports.

use backend_pod::adapters::inbound::{BackendGrpcService, GrpcServer, MetricsServer, ServerError};
use backend_pod::adapters::outbound::{
    HeapMemorySource, MetricRegistry, PrometheusMetricsStore, StdRngJitter,
};
use backend_pod::application::RpcInterceptor;
use backend_pod::domain::entities::PodProfile;
use backend_pod::domain::services::RequestSimulator;
use backend_pod::infrastructure::{ShutdownController, SystemSampler};
use backend_pod::proto::{
    BackendServiceClient, GetResourceRequest, HealthCheckRequest, ProcessDataRequest,
    ServingStatus,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tonic::transport::Channel;
use tonic::Code;

const POD_ID: &str = "it-pod";

struct TestPod {
    grpc_addr: SocketAddr,
    metrics_addr: SocketAddr,
    controller: ShutdownController,
    grpc_task: JoinHandle<Result<(), ServerError>>,
    metrics_task: JoinHandle<Result<(), ServerError>>,
    sampler_task: JoinHandle<()>,
}

impl TestPod {
    async fn start(cpu_factor: f64, latency_base_ms: u64, drain_timeout: Duration) -> Self {
        let registry = Arc::new(MetricRegistry::new());
        registry.register_process_collector().unwrap();
        let store = Arc::new(PrometheusMetricsStore::new(registry.clone(), POD_ID).unwrap());
        let profile = Arc::new(PodProfile::new(POD_ID, cpu_factor, latency_base_ms));
        let simulator = Arc::new(RequestSimulator::new(
            profile,
            Arc::new(StdRngJitter::seeded(7)),
        ));
        let controller = ShutdownController::new();
        let service = BackendGrpcService::new(simulator, controller.clone());
        let interceptor = RpcInterceptor::new(store.clone());

        let grpc = GrpcServer::bind("127.0.0.1:0".parse().unwrap(), service, interceptor)
            .await
            .unwrap()
            .with_drain_timeout(drain_timeout);
        let metrics = MetricsServer::bind("127.0.0.1:0".parse().unwrap(), registry)
            .await
            .unwrap();
        let grpc_addr = grpc.local_addr().unwrap();
        let metrics_addr = metrics.local_addr().unwrap();

        let sampler_task = SystemSampler::new(store, Arc::new(HeapMemorySource::new()))
            .with_period(Duration::from_millis(50))
            .spawn(controller.wait_for_drained());
        let grpc_task = tokio::spawn(grpc.serve());
        let metrics_task = tokio::spawn(metrics.serve(controller.wait_for_drained()));

        Self {
            grpc_addr,
            metrics_addr,
            controller,
            grpc_task,
            metrics_task,
            sampler_task,
        }
    }

    async fn client(&self) -> BackendServiceClient<Channel> {
        BackendServiceClient::connect(format!("http://{}", self.grpc_addr))
            .await
            .unwrap()
    }

    async fn scrape(&self) -> String {
        let response = reqwest::get(format!("http://{}/metrics", self.metrics_addr))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        response.text().await.unwrap()
    }

    async fn stop(self) {
        self.controller.shutdown();
        self.join().await;
    }

    /// Wait for every task to finish after shutdown was initiated.
    async fn join(self) {
        let timeout = Duration::from_secs(10);
        tokio::time::timeout(timeout, self.grpc_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(self.controller.is_drained());
        tokio::time::timeout(timeout, self.metrics_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        tokio::time::timeout(timeout, self.sampler_task)
            .await
            .unwrap()
            .unwrap();
    }
}

fn sample_value(exposition: &str, series: &str) -> Option<f64> {
    exposition
        .lines()
        .find_map(|line| line.strip_prefix(series)?.strip_prefix(' '))
        .and_then(|value| value.parse().ok())
}

#[tokio::test]
async fn test_process_data_is_recorded() {
    let pod = TestPod::start(1.0, 10, Duration::from_secs(5)).await;
    let mut client = pod.client().await;

    let response = client
        .process_data(ProcessDataRequest {
            data: "hello".to_string(),
            complexity: 42,
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.pod_id, POD_ID);
    assert!(response.result.starts_with("Processed[HELLO-0-"));
    assert!(response.result.contains("complexity=10, iterations=10000"));
    // latency_base + 10 x 10 ms
    assert!(response.processing_time_ms >= 110);

    let body = pod.scrape().await;
    assert_eq!(
        sample_value(
            &body,
            "grpc_server_requests_total{grpc_method=\"ProcessData\",grpc_service=\"BackendService\",pod=\"it-pod\",status=\"OK\"}"
        ),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            &body,
            "grpc_server_handling_seconds_count{grpc_method=\"ProcessData\",grpc_service=\"BackendService\",pod=\"it-pod\"}"
        ),
        Some(1.0)
    );

    pod.stop().await;
}

#[tokio::test]
async fn test_get_resource_slow_latency() {
    let pod = TestPod::start(1.0, 20, Duration::from_secs(5)).await;
    let mut client = pod.client().await;

    let start = Instant::now();
    let response = client
        .get_resource(GetResourceRequest {
            resource_id: "42".to_string(),
            simulate_slow_operation: true,
        })
        .await
        .unwrap()
        .into_inner();
    let elapsed = start.elapsed();

    // (20 / 2) x 3 plus up to 30 ms of jitter
    assert!(elapsed >= Duration::from_millis(30));
    assert!(elapsed < Duration::from_millis(60 + 500));
    assert!(response.resource_data.starts_with("Resource-42-Data-"));
    assert!(response.metadata.starts_with("Processed by it-pod in "));
    assert_eq!(response.pod_id, POD_ID);

    pod.stop().await;
}

#[tokio::test]
async fn test_health_check() {
    let pod = TestPod::start(1.0, 10, Duration::from_secs(5)).await;
    let mut client = pod.client().await;

    let response = client
        .health_check(HealthCheckRequest {})
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status(), ServingStatus::Serving);
    assert_eq!(response.pod_id, POD_ID);

    pod.stop().await;
}

#[tokio::test]
async fn test_metrics_endpoint_routes() {
    let pod = TestPod::start(1.0, 10, Duration::from_secs(5)).await;

    let health = reqwest::get(format!("http://{}/health", pod.metrics_addr))
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let missing = reqwest::get(format!("http://{}/nope", pod.metrics_addr))
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    // One sampler tick
    tokio::time::sleep(Duration::from_millis(120)).await;
    let metrics = reqwest::get(format!("http://{}/metrics", pod.metrics_addr))
        .await
        .unwrap();
    assert_eq!(
        metrics.headers()["content-type"],
        "text/plain; version=0.0.4"
    );
    let body = metrics.text().await.unwrap();
    assert!(body.contains("# TYPE container_memory_working_set_bytes gauge"));
    assert!(!body.contains("grpc_server_handling_seconds"));

    let mut client = pod.client().await;
    client.health_check(HealthCheckRequest {}).await.unwrap();
    let body = pod.scrape().await;
    assert!(body.contains("# TYPE grpc_server_handling_seconds histogram"));

    pod.stop().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_process_metrics_are_exported() {
    let pod = TestPod::start(1.0, 10, Duration::from_secs(5)).await;

    let body = pod.scrape().await;
    assert!(body.contains("# TYPE process_resident_memory_bytes gauge"));
    assert!(sample_value(&body, "process_resident_memory_bytes").unwrap() > 0.0);
    assert!(body.contains("process_cpu_seconds_total"));
    assert!(body.contains("process_open_fds"));

    pod.stop().await;
}

#[tokio::test]
async fn test_cpu_counter_increases_between_scrapes() {
    let pod = TestPod::start(1.0, 10, Duration::from_secs(5)).await;
    let series = "container_cpu_usage_seconds_total{pod=\"it-pod\"}";

    tokio::time::sleep(Duration::from_millis(120)).await;
    let first = sample_value(&pod.scrape().await, series).unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    let second = sample_value(&pod.scrape().await, series).unwrap();

    assert!(second > first);

    pod.stop().await;
}

#[tokio::test]
async fn test_graceful_shutdown_completes_in_flight_calls() {
    let pod = TestPod::start(1.0, 300, Duration::from_secs(5)).await;
    let mut client = pod.client().await;
    let grpc_addr = pod.grpc_addr;

    let in_flight = tokio::spawn(async move {
        client
            .process_data(ProcessDataRequest {
                data: "drain".to_string(),
                complexity: 1,
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pod.controller.active_calls(), 1);

    pod.stop().await;

    let response = in_flight.await.unwrap().unwrap().into_inner();
    assert_eq!(response.pod_id, POD_ID);

    // The listener is gone
    match BackendServiceClient::connect(format!("http://{}", grpc_addr)).await {
        Err(_) => {}
        Ok(mut client) => {
            let status = client.health_check(HealthCheckRequest {}).await.unwrap_err();
            assert_eq!(status.code(), Code::Unavailable);
        }
    }
}

#[tokio::test]
async fn test_metrics_are_scraped_while_draining() {
    let pod = TestPod::start(1.0, 1_000, Duration::from_secs(5)).await;
    let client = pod.client().await;
    let ok_series = "grpc_server_requests_total{grpc_method=\"ProcessData\",grpc_service=\"BackendService\",pod=\"it-pod\",status=\"OK\"}";

    // About 1 s
    let quick = tokio::spawn({
        let mut client = client.clone();
        async move {
            client
                .process_data(ProcessDataRequest {
                    data: "quick".to_string(),
                    complexity: 1,
                })
                .await
        }
    });
    // About 1.5 s
    let slow = tokio::spawn({
        let mut client = client.clone();
        async move {
            client
                .get_resource(GetResourceRequest {
                    resource_id: "slow".to_string(),
                    simulate_slow_operation: true,
                })
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    pod.controller.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Draining: the endpoint still answers
    let body = pod.scrape().await;
    assert_eq!(sample_value(&body, ok_series), None);

    quick.await.unwrap().unwrap();
    assert!(!pod.controller.is_drained());

    // The call that finished during the drain is visible
    let body = pod.scrape().await;
    assert_eq!(sample_value(&body, ok_series), Some(1.0));

    slow.await.unwrap().unwrap();
    pod.join().await;
}

#[tokio::test]
async fn test_drain_timeout_cancels_slow_calls() {
    let pod = TestPod::start(1.0, 10_000, Duration::from_millis(100)).await;
    let mut client = pod.client().await;

    let in_flight = tokio::spawn(async move {
        client
            .get_resource(GetResourceRequest {
                resource_id: "stuck".to_string(),
                simulate_slow_operation: true,
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    pod.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let status = in_flight.await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::Cancelled);
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let pod = TestPod::start(1.0, 10, Duration::from_secs(5)).await;

    let registry = Arc::new(MetricRegistry::new());
    let result = MetricsServer::bind(pod.metrics_addr, registry).await;
    assert!(matches!(result, Err(ServerError::Bind { .. })));

    pod.stop().await;
}
