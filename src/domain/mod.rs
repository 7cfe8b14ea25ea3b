//! Domain Layer
//!
//! Pod characteristics, method-name labels, the request simulator and the
//! ports it talks through. No transport or registry details live here.

pub mod entities;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::{HealthReport, PodProfile, ProcessedData, ResourceData, ServingStatus};
pub use value_objects::MethodName;
