//! Application layer - use cases wrapped around the domain.

pub mod rpc_interceptor;

pub use rpc_interceptor::{code_label, RpcInterceptor, StatusCoded};
