//! Prometheus metrics for resolution and manifest synchronization.

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

use crate::error::{Error, Result};

/// Configuration for sync metrics collection.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Metric prefix for all metrics.
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: "plugin_sync".to_string(),
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metric prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Sync metrics collector.
pub struct SyncMetrics {
    config: MetricsConfig,
    registry: Registry,
    resolutions: Counter,
    resolution_failures: Counter,
    installs: Counter,
    removals: Counter,
    manifest_write_failures: Counter,
    resolve_duration: Histogram,
}

fn counter(registry: &Registry, prefix: &str, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(format!("{}_{}", prefix, name), help)
        .map_err(|e| Error::Metrics(e.to_string()))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| Error::Metrics(e.to_string()))?;
    Ok(counter)
}

impl SyncMetrics {
    /// Create a new metrics collector with the given configuration.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let registry = Registry::new();
        let prefix = config.prefix.as_str();

        let resolutions = counter(
            &registry,
            prefix,
            "resolutions_total",
            "Total number of successful dependency resolutions",
        )?;
        let resolution_failures = counter(
            &registry,
            prefix,
            "resolution_failures_total",
            "Total number of failed dependency resolutions",
        )?;
        let installs = counter(
            &registry,
            prefix,
            "installs_total",
            "Total number of artifacts installed",
        )?;
        let removals = counter(
            &registry,
            prefix,
            "removals_total",
            "Total number of plugins removed",
        )?;
        let manifest_write_failures = counter(
            &registry,
            prefix,
            "manifest_write_failures_total",
            "Total number of failed manifest writes",
        )?;

        let resolve_duration = Histogram::with_opts(
            HistogramOpts::new(
                format!("{}_resolve_duration_seconds", prefix),
                "Dependency resolution duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(resolve_duration.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;

        Ok(Self {
            config,
            registry,
            resolutions,
            resolution_failures,
            installs,
            removals,
            manifest_write_failures,
            resolve_duration,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a resolution outcome.
    pub fn record_resolution(&self, success: bool, duration_secs: f64) {
        if success {
            self.resolutions.inc();
        } else {
            self.resolution_failures.inc();
        }
        self.resolve_duration.observe(duration_secs);
    }

    /// Record installed artifacts.
    pub fn record_install(&self, artifacts: usize) {
        self.installs.inc_by(artifacts as f64);
    }

    /// Record a removal.
    pub fn record_removal(&self) {
        self.removals.inc();
    }

    /// Record a failed manifest write.
    pub fn record_write_failure(&self) {
        self.manifest_write_failures.inc();
    }

    /// Total successful resolutions.
    pub fn resolutions_total(&self) -> u64 {
        self.resolutions.get() as u64
    }

    /// Total failed resolutions.
    pub fn resolution_failures_total(&self) -> u64 {
        self.resolution_failures.get() as u64
    }

    /// Total installed artifacts.
    pub fn installs_total(&self) -> u64 {
        self.installs.get() as u64
    }

    /// Total removals.
    pub fn removals_total(&self) -> u64 {
        self.removals.get() as u64
    }

    /// Total failed manifest writes.
    pub fn manifest_write_failures_total(&self) -> u64 {
        self.manifest_write_failures.get() as u64
    }
}

impl std::fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetrics")
            .field("config", &self.config)
            .field("resolutions", &self.resolutions_total())
            .field("installs", &self.installs_total())
            .field("removals", &self.removals_total())
            .finish()
    }
}
