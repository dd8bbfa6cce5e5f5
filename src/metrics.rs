//! Metrics registry for discovery observability
//!
//! Provides OpenTelemetry instruments for:
//! - DiscoveryConfig population
//! - Discovery pass outcome and duration
//! - DiscoveredCluster writes
//! - Managed overlay updates

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for discovery metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("discovery"));

/// Gauge of DiscoveryConfig resources across all namespaces
pub static DISCOVERY_CONFIG_TOTAL: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("discovery_config_total")
        .with_description("Number of discoveryConfigs across namespaces")
        .with_unit("{configs}")
        .build()
});

/// Histogram of discovery pass duration
///
/// Labels:
/// - `namespace`: namespace of the DiscoveryConfig
/// - `outcome`: applied, cleanup, transient, error
pub static DISCOVERY_PASS_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("discovery_pass_duration_seconds")
        .with_description("Duration of discovery passes in seconds")
        .with_unit("s")
        .build()
});

/// Counter of DiscoveredCluster writes
///
/// Labels:
/// - `action`: create, update, delete
pub static DISCOVERED_CLUSTER_WRITES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("discovered_cluster_writes_total")
        .with_description("Total number of DiscoveredCluster writes by action")
        .with_unit("{writes}")
        .build()
});

/// Counter of managed flag flips made by the overlay
///
/// Labels:
/// - `managed`: true, false (the new value)
pub static MANAGED_OVERLAY_UPDATES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("discovery_managed_overlay_updates_total")
        .with_description("Total number of managed flag updates made by the overlay")
        .with_unit("{updates}")
        .build()
});

/// Outcome label for a discovery pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Canonical set computed and applied
    Applied,
    /// Credential unusable, records removed
    Cleanup,
    /// Remote failure, nothing touched
    Transient,
    /// Pass returned an error to the scheduler
    Error,
}

impl PassOutcome {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Cleanup => "cleanup",
            Self::Transient => "transient",
            Self::Error => "error",
        }
    }
}

/// Record the current DiscoveryConfig count
pub fn set_discovery_config_total(count: usize) {
    DISCOVERY_CONFIG_TOTAL.record(count as i64, &[]);
}

/// Record one finished discovery pass
pub fn record_pass(namespace: &str, outcome: PassOutcome, seconds: f64) {
    DISCOVERY_PASS_DURATION.record(
        seconds,
        &[
            KeyValue::new("namespace", namespace.to_string()),
            KeyValue::new("outcome", outcome.as_str()),
        ],
    );
}

/// Count one DiscoveredCluster write
pub fn record_write(action: &'static str) {
    DISCOVERED_CLUSTER_WRITES.add(1, &[KeyValue::new("action", action)]);
}

/// Count one managed flag update
pub fn record_overlay_update(managed: bool) {
    MANAGED_OVERLAY_UPDATES.add(1, &[KeyValue::new("managed", managed.to_string())]);
}
