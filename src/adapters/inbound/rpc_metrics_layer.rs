//! RPC Metrics Layer
//!
//! Tower middleware that runs every call reaching the gRPC server through
//! the RPC interceptor. The full method comes from the request path, the
//! status from the `grpc-status` response header.

use crate::application::RpcInterceptor;
use std::task::{Context, Poll};
use tonic::codegen::http::{HeaderMap, Request, Response};
use tonic::codegen::BoxFuture;
use tonic::Code;
use tower::{Layer, Service};

const GRPC_STATUS_HEADER: &str = "grpc-status";

/// Installs the interceptor in front of every service on a tonic server.
#[derive(Clone)]
pub struct RpcMetricsLayer {
    interceptor: RpcInterceptor,
}

impl RpcMetricsLayer {
    pub fn new(interceptor: RpcInterceptor) -> Self {
        Self { interceptor }
    }
}

impl<S> Layer<S> for RpcMetricsLayer {
    type Service = RpcMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcMetricsService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RpcMetricsService<S> {
    inner: S,
    interceptor: RpcInterceptor,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RpcMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), S::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Keep the instance that was polled ready for this call
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();
        let full_method = request.uri().path().to_string();

        Box::pin(async move {
            interceptor
                .intercept_with(
                    &full_method,
                    move || inner.call(request),
                    response_code::<ResBody, S::Error>,
                )
                .await
        })
    }
}

fn response_code<B, E>(result: &Result<Response<B>, E>) -> Code {
    match result {
        Ok(response) => grpc_status(response.headers()).unwrap_or(Code::Ok),
        Err(_) => Code::Unknown,
    }
}

/// Status sent with the response headers.
///
/// tonic answers a failed unary call with a trailers-only response, so a
/// handler error always shows up here; a response without it succeeded.
fn grpc_status(headers: &HeaderMap) -> Option<Code> {
    headers
        .get(GRPC_STATUS_HEADER)
        .map(|value| Code::from_bytes(value.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::inbound::BackendGrpcService;
    use crate::adapters::outbound::{
        MetricRegistry, PrometheusMetricsStore, GRPC_SERVER_HANDLING_SECONDS,
        GRPC_SERVER_REQUESTS_TOTAL,
    };
    use crate::domain::entities::PodProfile;
    use crate::domain::ports::JitterSource;
    use crate::domain::services::RequestSimulator;
    use crate::infrastructure::ShutdownController;
    use crate::proto::{BackendServiceServer, GetResourceRequest, HealthCheckRequest};
    use http_body_util::Full;
    use prost::Message;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::time::Duration;
    use tonic::codegen::Bytes;
    use tower::ServiceExt;

    struct NoJitter;

    impl JitterSource for NoJitter {
        fn jitter_ms(&self, _upper: u64) -> u64 {
            0
        }
    }

    fn setup() -> (RpcMetricsLayer, Arc<MetricRegistry>) {
        let registry = Arc::new(MetricRegistry::new());
        let store = PrometheusMetricsStore::new(registry.clone(), "pod-a").unwrap();
        let layer = RpcMetricsLayer::new(RpcInterceptor::new(Arc::new(store)));
        (layer, registry)
    }

    fn requests(registry: &MetricRegistry, service: &str, method: &str, status: &str) -> Option<f64> {
        registry.counter_value(GRPC_SERVER_REQUESTS_TOTAL, &[method, service, "pod-a", status])
    }

    fn backend(latency_base_ms: u64, controller: &ShutdownController) -> BackendServiceServer<BackendGrpcService> {
        let profile = Arc::new(PodProfile::new("pod-a", 1.0, latency_base_ms));
        let simulator = Arc::new(RequestSimulator::new(profile, Arc::new(NoJitter)));
        BackendServiceServer::new(BackendGrpcService::new(simulator, controller.clone()))
    }

    /// Length-prefixed gRPC request carrying one message.
    fn grpc_request<M: Message>(path: &str, message: M) -> Request<Full<Bytes>> {
        let payload = message.encode_to_vec();
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.push(0);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/grpc")
            .header("te", "trailers")
            .body(Full::new(Bytes::from(frame)))
            .unwrap()
    }

    #[test]
    fn test_grpc_status_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(grpc_status(&headers), None);

        headers.insert(GRPC_STATUS_HEADER, "5".parse().unwrap());
        assert_eq!(grpc_status(&headers), Some(Code::NotFound));

        headers.insert(GRPC_STATUS_HEADER, "0".parse().unwrap());
        assert_eq!(grpc_status(&headers), Some(Code::Ok));
    }

    #[tokio::test]
    async fn test_response_without_status_is_ok() {
        let (layer, registry) = setup();
        let inner = tower::service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(()))
        });

        let request = Request::builder()
            .uri("/loadbalancer.BackendService/ProcessData")
            .body(())
            .unwrap();
        layer.layer(inner).oneshot(request).await.unwrap();

        assert_eq!(requests(&registry, "BackendService", "ProcessData", "OK"), Some(1.0));
    }

    #[tokio::test]
    async fn test_status_header_is_recorded() {
        let (layer, registry) = setup();
        let inner = tower::service_fn(|_req: Request<()>| async {
            let mut response = Response::new(());
            response
                .headers_mut()
                .insert(GRPC_STATUS_HEADER, "7".parse().unwrap());
            Ok::<_, Infallible>(response)
        });

        let request = Request::builder().uri("/pkg.Svc/Call").body(()).unwrap();
        let response = layer.layer(inner).oneshot(request).await.unwrap();

        assert_eq!(response.headers()[GRPC_STATUS_HEADER], "7");
        assert_eq!(requests(&registry, "Svc", "Call", "PermissionDenied"), Some(1.0));
    }

    #[tokio::test]
    async fn test_service_error_is_unknown_and_passed_through() {
        let (layer, registry) = setup();
        let inner = tower::service_fn(|_req: Request<()>| async {
            Err::<Response<()>, _>(std::io::Error::other("connection reset"))
        });

        let request = Request::builder().uri("/pkg.Svc/Call").body(()).unwrap();
        let err = layer.layer(inner).oneshot(request).await.unwrap_err();

        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(requests(&registry, "Svc", "Call", "Unknown"), Some(1.0));
    }

    #[tokio::test]
    async fn test_backend_call_is_recorded() {
        let (layer, registry) = setup();
        let controller = ShutdownController::new();
        let service = layer.layer(backend(10, &controller));

        let response = service
            .oneshot(grpc_request(
                "/loadbalancer.BackendService/HealthCheck",
                HealthCheckRequest {},
            ))
            .await
            .unwrap();

        assert!(response.headers().get(GRPC_STATUS_HEADER).is_none());
        assert_eq!(requests(&registry, "BackendService", "HealthCheck", "OK"), Some(1.0));
        let hist = registry
            .histogram_snapshot(GRPC_SERVER_HANDLING_SECONDS, &["HealthCheck", "BackendService", "pod-a"])
            .unwrap();
        assert_eq!(hist.count, 1);
    }

    #[tokio::test]
    async fn test_unimplemented_method_is_recorded() {
        let (layer, registry) = setup();
        let controller = ShutdownController::new();
        let service = layer.layer(backend(10, &controller));

        let response = service
            .oneshot(grpc_request(
                "/loadbalancer.BackendService/Nope",
                HealthCheckRequest {},
            ))
            .await
            .unwrap();

        assert_eq!(response.headers()[GRPC_STATUS_HEADER], "12");
        assert_eq!(
            requests(&registry, "BackendService", "Nope", "Unimplemented"),
            Some(1.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_is_recorded_as_canceled() {
        let (layer, registry) = setup();
        let controller = ShutdownController::new();
        let service = layer.layer(backend(100, &controller));

        let call = tokio::spawn(service.oneshot(grpc_request(
            "/loadbalancer.BackendService/GetResource",
            GetResourceRequest {
                resource_id: "r1".to_string(),
                simulate_slow_operation: true,
            },
        )));

        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.cancel_calls();

        let response = call.await.unwrap().unwrap();
        assert_eq!(response.headers()[GRPC_STATUS_HEADER], "1");
        assert_eq!(
            requests(&registry, "BackendService", "GetResource", "Canceled"),
            Some(1.0)
        );
        assert_eq!(controller.active_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_is_recorded_as_canceled() {
        let (layer, registry) = setup();
        let controller = ShutdownController::new();
        let service = layer.layer(backend(10_000, &controller));

        let call = service.oneshot(grpc_request(
            "/loadbalancer.BackendService/GetResource",
            GetResourceRequest {
                resource_id: "r1".to_string(),
                simulate_slow_operation: false,
            },
        ));
        let timed_out = tokio::time::timeout(Duration::from_millis(100), call).await;

        assert!(timed_out.is_err());
        assert_eq!(
            requests(&registry, "BackendService", "GetResource", "Canceled"),
            Some(1.0)
        );
        assert_eq!(requests(&registry, "BackendService", "GetResource", "OK"), None);
    }
}
