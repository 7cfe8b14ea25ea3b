use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// Configuration values that could not be used.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Parse {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    // Pod identity and characteristics
    pub pod_id: String,
    pub cpu_factor: f64,
    pub latency_base_ms: u64,

    // Listeners
    pub grpc_port: u16,
    pub metrics_port: u16,

    // Lifecycle
    pub shutdown_drain_timeout_secs: u64,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pod_id: "backend-pod-unknown".to_string(),
            cpu_factor: 1.0,
            latency_base_ms: 50,
            grpc_port: 9090,
            metrics_port: 8080,
            shutdown_drain_timeout_secs: 30,
            debug: false,
        }
    }
}

impl Config {
    /// Build the configuration from a key lookup.
    ///
    /// Empty values count as unset. Malformed numbers are logged and the
    /// default is used instead.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let (config, rejected) = Self::resolve(lookup);
        warn_rejected(&rejected);
        config
    }

    /// Like [`from_lookup`], returning the rejected values instead of
    /// logging them.
    ///
    /// [`from_lookup`]: Config::from_lookup
    pub fn resolve<F>(lookup: F) -> (Self, Vec<ConfigError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut rejected = Vec::new();

        let pod_id = get("POD_ID").unwrap_or(defaults.pod_id);

        let grpc_port = parse_or_default(
            "GRPC_PORT",
            get("GRPC_PORT"),
            defaults.grpc_port,
            &mut rejected,
        );

        let metrics_port = parse_or_default(
            "METRICS_PORT",
            get("METRICS_PORT"),
            defaults.metrics_port,
            &mut rejected,
        );

        let cpu_factor = match parse_var::<f64>("CPU_FACTOR", get("CPU_FACTOR")) {
            Ok(Some(v)) if v.is_finite() && v >= 0.0 => v,
            Ok(Some(v)) => {
                rejected.push(ConfigError::Parse {
                    key: "CPU_FACTOR",
                    value: v.to_string(),
                    reason: "must be a finite, non-negative number".to_string(),
                });
                defaults.cpu_factor
            }
            Ok(None) => defaults.cpu_factor,
            Err(e) => {
                rejected.push(e);
                defaults.cpu_factor
            }
        };

        let latency_base_ms = parse_or_default(
            "LATENCY_BASE",
            get("LATENCY_BASE"),
            defaults.latency_base_ms,
            &mut rejected,
        );

        let shutdown_drain_timeout_secs = parse_or_default(
            "SHUTDOWN_DRAIN_TIMEOUT_SECS",
            get("SHUTDOWN_DRAIN_TIMEOUT_SECS"),
            defaults.shutdown_drain_timeout_secs,
            &mut rejected,
        );

        let debug = get("DEBUG").is_some();

        let config = Config {
            pod_id,
            cpu_factor,
            latency_base_ms,
            grpc_port,
            metrics_port,
            shutdown_drain_timeout_secs,
            debug,
        };
        (config, rejected)
    }

    /// Most verbose level to log at.
    pub fn log_level(&self) -> tracing::Level {
        if self.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// gRPC bind address on all interfaces.
    pub fn grpc_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.grpc_port))
    }

    /// Metrics bind address on all interfaces.
    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.metrics_port))
    }
}

fn parse_var<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Parse {
                key,
                reason: e.to_string(),
                value,
            }),
    }
}

fn parse_or_default<T>(
    key: &'static str,
    raw: Option<String>,
    default: T,
    rejected: &mut Vec<ConfigError>,
) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match parse_var(key, raw) {
        Ok(Some(v)) => v,
        Ok(None) => default,
        Err(e) => {
            rejected.push(e);
            default
        }
    }
}

/// Log every rejected value; each one fell back to its default.
pub fn warn_rejected(rejected: &[ConfigError]) {
    for err in rejected {
        tracing::warn!("{}, using default", err);
    }
}

/// Load the configuration from the process environment.
///
/// Rejected values are returned, not logged, so the caller can report them
/// once the subscriber built from [`Config::log_level`] is installed.
pub fn load_config() -> (Config, Vec<ConfigError>) {
    Config::resolve(|key| std::env::var(key).ok())
}
