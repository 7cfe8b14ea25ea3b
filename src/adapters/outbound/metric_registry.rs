//! Metric Registry
//!
//! Labelled counters, gauges and histograms on top of a `prometheus::Registry`.
//! Series are created lazily per label tuple and live for the process lifetime.

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use prometheus::core::Collector;
use prometheus::proto::{Metric, MetricFamily};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::fmt;

/// Default histogram upper bounds in seconds (`+Inf` is implicit).
pub use prometheus::DEFAULT_BUCKETS;

/// Kind of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDesc {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    /// Histogram upper bounds, sorted and finite. Empty for other kinds.
    pub buckets: Vec<f64>,
}

impl MetricDesc {
    fn new(kind: MetricKind, name: &str, help: &str, label_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind,
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            buckets: Vec::new(),
        }
    }

    /// Describe a counter family.
    pub fn counter(name: &str, help: &str, label_names: &[&str]) -> Self {
        Self::new(MetricKind::Counter, name, help, label_names)
    }

    /// Describe a gauge family.
    pub fn gauge(name: &str, help: &str, label_names: &[&str]) -> Self {
        Self::new(MetricKind::Gauge, name, help, label_names)
    }

    /// Describe a histogram family with the default buckets.
    pub fn histogram(name: &str, help: &str, label_names: &[&str]) -> Self {
        let mut desc = Self::new(MetricKind::Histogram, name, help, label_names);
        desc.buckets = DEFAULT_BUCKETS.to_vec();
        desc
    }

    /// Replace the histogram buckets. Non-finite bounds are dropped.
    pub fn with_buckets(mut self, mut buckets: Vec<f64>) -> Self {
        buckets.retain(|b| b.is_finite());
        buckets.sort_by(|a, b| a.total_cmp(b));
        buckets.dedup();
        self.buckets = buckets;
        self
    }

    fn label_refs(&self) -> Vec<&str> {
        self.label_names.iter().map(String::as_str).collect()
    }
}

/// Registry errors. All but `Render` are programming errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("metric family {0} is already registered")]
    DuplicateRegistration(String),
    #[error("counter {name} cannot be decreased (delta {delta})")]
    NegativeDelta { name: String, delta: f64 },
    #[error("metric family {0} is not registered")]
    UnknownFamily(String),
    #[error("metric family {name} is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: MetricKind,
        actual: MetricKind,
    },
    #[error("metric family {name} expects {expected} label values, got {got}")]
    LabelMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid value {value} for metric family {name}")]
    InvalidValue { name: String, value: f64 },
    #[error("invalid metric family {name}: {reason}")]
    InvalidDescriptor { name: String, reason: String },
    #[error("failed to render metrics: {0}")]
    Render(String),
}

impl RegistryError {
    fn from_prometheus(name: &str, err: prometheus::Error) -> Self {
        match err {
            prometheus::Error::AlreadyReg => RegistryError::DuplicateRegistration(name.to_string()),
            prometheus::Error::InconsistentCardinality { expect, got } => {
                RegistryError::LabelMismatch {
                    name: name.to_string(),
                    expected: expect,
                    got,
                }
            }
            other => RegistryError::InvalidDescriptor {
                name: name.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Point-in-time view of one histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper_bound, cumulative_count)` for each finite bound.
    pub buckets: Vec<(f64, u64)>,
    pub count: u64,
    pub sum: f64,
}

/// A family's series, tagged by kind.
enum Family {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

impl Family {
    fn build(desc: &MetricDesc) -> prometheus::Result<Self> {
        let labels = desc.label_refs();
        let family = match desc.kind {
            MetricKind::Counter => {
                Family::Counter(CounterVec::new(Opts::new(&desc.name, &desc.help), &labels)?)
            }
            MetricKind::Gauge => {
                Family::Gauge(GaugeVec::new(Opts::new(&desc.name, &desc.help), &labels)?)
            }
            MetricKind::Histogram => Family::Histogram(HistogramVec::new(
                HistogramOpts::new(&desc.name, &desc.help).buckets(desc.buckets.clone()),
                &labels,
            )?),
        };
        Ok(family)
    }

    fn kind(&self) -> MetricKind {
        match self {
            Family::Counter(_) => MetricKind::Counter,
            Family::Gauge(_) => MetricKind::Gauge,
            Family::Histogram(_) => MetricKind::Histogram,
        }
    }

    fn boxed(&self) -> Box<dyn Collector> {
        match self {
            Family::Counter(v) => Box::new(v.clone()),
            Family::Gauge(v) => Box::new(v.clone()),
            Family::Histogram(v) => Box::new(v.clone()),
        }
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self {
            Family::Counter(v) => v.collect(),
            Family::Gauge(v) => v.collect(),
            Family::Histogram(v) => v.collect(),
        }
    }
}

struct RegisteredFamily {
    desc: MetricDesc,
    family: Family,
}

impl RegisteredFamily {
    fn kind_mismatch(&self, expected: MetricKind) -> RegistryError {
        RegistryError::KindMismatch {
            name: self.desc.name.clone(),
            expected,
            actual: self.family.kind(),
        }
    }

    /// Existing series for `labels`, without creating it.
    fn find(&self, labels: &[&str]) -> Option<Metric> {
        if labels.len() != self.desc.label_names.len() {
            return None;
        }
        let wanted: Vec<(&str, &str)> = self
            .desc
            .label_names
            .iter()
            .map(String::as_str)
            .zip(labels.iter().copied())
            .collect();

        self.family
            .collect()
            .iter()
            .flat_map(|mf| mf.get_metric())
            .find(|m| {
                wanted.iter().all(|(name, value)| {
                    m.get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
                })
            })
            .cloned()
    }
}

/// Process-wide metric registry.
///
/// Writers (RPC handlers, the sampler) and readers (scrapes) share it through
/// an `Arc`. Each series is updated atomically by the `prometheus` crate.
pub struct MetricRegistry {
    registry: Registry,
    families: DashMap<String, RegisteredFamily>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            families: DashMap::new(),
        }
    }

    /// Register a new family.
    pub fn register(&self, desc: MetricDesc) -> Result<(), RegistryError> {
        match self.families.entry(desc.name.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateRegistration(desc.name)),
            Entry::Vacant(slot) => {
                let family = Family::build(&desc)
                    .map_err(|e| RegistryError::from_prometheus(&desc.name, e))?;
                self.registry
                    .register(family.boxed())
                    .map_err(|e| RegistryError::from_prometheus(&desc.name, e))?;

                tracing::debug!("registered metric family {} ({})", desc.name, desc.kind);
                slot.insert(RegisteredFamily { desc, family });
                Ok(())
            }
        }
    }

    /// Also export the standard `process_*` metrics of this process.
    #[cfg(target_os = "linux")]
    pub fn register_process_collector(&self) -> Result<(), RegistryError> {
        use prometheus::process_collector::ProcessCollector;

        self.registry
            .register(Box::new(ProcessCollector::for_self()))
            .map_err(|e| RegistryError::from_prometheus("process", e))
    }

    /// Process metrics are only collected on Linux.
    #[cfg(not(target_os = "linux"))]
    pub fn register_process_collector(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    /// Names of all registered families, sorted.
    pub fn family_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.families.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn family(&self, name: &str) -> Result<Ref<'_, String, RegisteredFamily>, RegistryError> {
        self.families
            .get(name)
            .ok_or_else(|| RegistryError::UnknownFamily(name.to_string()))
    }

    /// Record a histogram observation.
    pub fn observe(&self, name: &str, labels: &[&str], value: f64) -> Result<(), RegistryError> {
        let entry = self.family(name)?;
        let Family::Histogram(vec) = &entry.family else {
            return Err(entry.kind_mismatch(MetricKind::Histogram));
        };
        if value.is_nan() {
            return Err(RegistryError::InvalidValue {
                name: name.to_string(),
                value,
            });
        }
        vec.get_metric_with_label_values(labels)
            .map_err(|e| RegistryError::from_prometheus(name, e))?
            .observe(value);
        Ok(())
    }

    /// Add a non-negative delta to a counter.
    pub fn add(&self, name: &str, labels: &[&str], delta: f64) -> Result<(), RegistryError> {
        let entry = self.family(name)?;
        let Family::Counter(vec) = &entry.family else {
            return Err(entry.kind_mismatch(MetricKind::Counter));
        };
        if delta.is_nan() || delta < 0.0 {
            return Err(RegistryError::NegativeDelta {
                name: name.to_string(),
                delta,
            });
        }
        vec.get_metric_with_label_values(labels)
            .map_err(|e| RegistryError::from_prometheus(name, e))?
            .inc_by(delta);
        Ok(())
    }

    /// Set a gauge to a value.
    pub fn set(&self, name: &str, labels: &[&str], value: f64) -> Result<(), RegistryError> {
        let entry = self.family(name)?;
        let Family::Gauge(vec) = &entry.family else {
            return Err(entry.kind_mismatch(MetricKind::Gauge));
        };
        if value.is_nan() {
            return Err(RegistryError::InvalidValue {
                name: name.to_string(),
                value,
            });
        }
        vec.get_metric_with_label_values(labels)
            .map_err(|e| RegistryError::from_prometheus(name, e))?
            .set(value);
        Ok(())
    }

    /// Current value of a counter series, if it exists.
    pub fn counter_value(&self, name: &str, labels: &[&str]) -> Option<f64> {
        let entry = self.families.get(name)?;
        if entry.family.kind() != MetricKind::Counter {
            return None;
        }
        entry.find(labels).map(|m| m.get_counter().get_value())
    }

    /// Current value of a gauge series, if it exists.
    pub fn gauge_value(&self, name: &str, labels: &[&str]) -> Option<f64> {
        let entry = self.families.get(name)?;
        if entry.family.kind() != MetricKind::Gauge {
            return None;
        }
        entry.find(labels).map(|m| m.get_gauge().get_value())
    }

    /// Snapshot of a histogram series, if it exists.
    pub fn histogram_snapshot(&self, name: &str, labels: &[&str]) -> Option<HistogramSnapshot> {
        let entry = self.families.get(name)?;
        if entry.family.kind() != MetricKind::Histogram {
            return None;
        }
        let metric = entry.find(labels)?;
        let histogram = metric.get_histogram();
        Some(HistogramSnapshot {
            buckets: histogram
                .get_bucket()
                .iter()
                .map(|b| (b.get_upper_bound(), b.get_cumulative_count()))
                .collect(),
            count: histogram.get_sample_count(),
            sum: histogram.get_sample_sum(),
        })
    }

    /// Render every family in the Prometheus text format (version 0.0.4).
    ///
    /// Families appear once they hold a series. Each series is read
    /// atomically; different series may reflect slightly different instants.
    pub fn render(&self) -> Result<String, RegistryError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| RegistryError::Render(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| RegistryError::Render(e.to_string()))
    }
}
