//! RPC Interceptor - per-call telemetry
//!
//! Times every inbound call and records one latency observation and one
//! request count labelled with the derived gRPC status. The gRPC transport
//! installs it once for the whole server through `RpcMetricsLayer`.

use crate::domain::ports::MetricsRecorder;
use crate::domain::value_objects::MethodName;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tonic::{Code, Status};

/// Errors that may carry a structured gRPC status code.
pub trait StatusCoded {
    fn status_code(&self) -> Option<Code>;
}

impl StatusCoded for Status {
    fn status_code(&self) -> Option<Code> {
        Some(self.code())
    }
}

impl StatusCoded for anyhow::Error {
    fn status_code(&self) -> Option<Code> {
        self.downcast_ref::<Status>().map(Status::code)
    }
}

/// Canonical gRPC name of a status code, as used in the `status` label.
pub fn code_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "Canceled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
    }
}

/// Server interceptor recording handling latency and request counts.
///
/// Transparent to the handler: results and errors pass through untouched
/// and panics are never caught. Recording failures are logged and dropped.
#[derive(Clone)]
pub struct RpcInterceptor {
    recorder: Arc<dyn MetricsRecorder>,
}

impl RpcInterceptor {
    pub fn new(recorder: Arc<dyn MetricsRecorder>) -> Self {
        Self { recorder }
    }

    /// Run `handler` for the call `full_method` and record its outcome.
    ///
    /// Status is `OK` on success, the error's gRPC code when it has one and
    /// `Unknown` otherwise. If the returned future is dropped before the
    /// handler finishes, the call is recorded as `Canceled`.
    pub async fn intercept<T, E, F, Fut>(&self, full_method: &str, handler: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StatusCoded,
    {
        self.intercept_with(full_method, handler, |result: &Result<T, E>| match result {
            Ok(_) => Code::Ok,
            Err(e) => e.status_code().unwrap_or(Code::Unknown),
        })
        .await
    }

    /// Like [`intercept`], with the status read from the handler's output
    /// by `status_of`.
    ///
    /// [`intercept`]: RpcInterceptor::intercept
    pub async fn intercept_with<R, F, Fut, C>(&self, full_method: &str, handler: F, status_of: C) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
        C: FnOnce(&R) -> Code,
    {
        let mut call = InFlightCall {
            interceptor: self,
            full_method,
            start: Instant::now(),
            finished: false,
        };

        let output = handler().await;
        call.finish(code_label(status_of(&output)));

        output
    }

    fn record(&self, full_method: &str, status: &str, duration: Duration) {
        let name = MethodName::parse(full_method);
        tracing::debug!(
            "rpc {} status={} duration_ms={}",
            name,
            status,
            duration.as_millis()
        );
        if let Err(e) = self.recorder.record_rpc(&name, status, duration) {
            tracing::warn!("failed to record metrics for {}: {}", full_method, e);
        }
    }
}

/// Records a dropped call exactly once.
struct InFlightCall<'a> {
    interceptor: &'a RpcInterceptor,
    full_method: &'a str,
    start: Instant,
    finished: bool,
}

impl InFlightCall<'_> {
    fn finish(&mut self, status: &str) {
        self.finished = true;
        self.interceptor
            .record(self.full_method, status, self.start.elapsed());
    }
}

impl Drop for InFlightCall<'_> {
    fn drop(&mut self) {
        // A panicking handler is left to unwind unrecorded
        if !self.finished && !std::thread::panicking() {
            self.interceptor.record(
                self.full_method,
                code_label(Code::Cancelled),
                self.start.elapsed(),
            );
        }
    }
}
