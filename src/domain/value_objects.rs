//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Placeholder used when a full method cannot be split.
pub const UNKNOWN: &str = "unknown";

/// Service and method names extracted from an RPC full method.
///
/// Full methods have the form `/package.Service/Method`. Only the last
/// segment of the dotted service path is kept, so the labels stay short.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodName {
    pub service: String,
    pub method: String,
}

impl MethodName {
    /// Split a full method string. Never fails.
    ///
    /// # Examples
    /// ```
    /// use backend_pod::domain::value_objects::MethodName;
    ///
    /// let name = MethodName::parse("/loadbalancer.BackendService/ProcessData");
    /// assert_eq!(name.service, "BackendService");
    /// assert_eq!(name.method, "ProcessData");
    ///
    /// assert_eq!(MethodName::parse(""), MethodName::new("unknown", "unknown"));
    /// ```
    pub fn parse(full_method: &str) -> Self {
        let Some(rest) = full_method.strip_prefix('/') else {
            return Self::new(UNKNOWN, UNKNOWN);
        };

        // Last slash wins
        let Some((service_part, method)) = rest.rsplit_once('/') else {
            return Self::new(UNKNOWN, rest);
        };

        // Last dot wins
        let service = service_part
            .rsplit_once('.')
            .map(|(_, service)| service)
            .unwrap_or(service_part);

        Self::new(service, method)
    }

    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }
}

impl std::fmt::Display for MethodName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}
