//! Generated protobuf messages and gRPC stubs for `loadbalancer.BackendService`.

#![allow(clippy::derive_partial_eq_without_eq)]

tonic::include_proto!("loadbalancer");

/// Encoded descriptor set served through gRPC reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("loadbalancer_descriptor");

pub use backend_service_client::BackendServiceClient;
pub use backend_service_server::{BackendService, BackendServiceServer};
pub use health_check_response::ServingStatus;
