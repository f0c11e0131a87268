use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// Engine operation name (`branches`, `checkout`, `run-commands`, ...).
    pub operation: String,
    /// `ok` or `error`.
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PolicyLabels {
    /// Deployment policy label (`copy-only`, `commit-and-push`, `transfer`).
    pub policy: String,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Central container for every Prometheus metric exposed by the agent.
pub struct Metrics {
    // -- engine operations --
    pub operations_total: Family<OperationLabels, Counter>,
    pub operation_duration_seconds: Histogram,

    // -- deployments --
    pub deploys_total: Family<PolicyLabels, Counter>,
    pub deploy_upload_bytes: Counter,

    // -- advisory --
    pub advisory_rejections_total: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        // Counter names are registered without the `_total` suffix; the
        // OpenMetrics encoder appends it.
        let operations_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "repodrive_operations",
            "Engine operations by name and outcome",
            operations_total.clone(),
        );

        let operation_duration_seconds = Histogram::new(exponential_buckets(0.05, 2.0, 12));
        registry.register(
            "repodrive_operation_duration_seconds",
            "End-to-end engine operation latency in seconds",
            operation_duration_seconds.clone(),
        );

        let deploys_total = Family::<PolicyLabels, Counter>::default();
        registry.register(
            "repodrive_deploys",
            "Dist deployments by policy",
            deploys_total.clone(),
        );

        let deploy_upload_bytes = Counter::default();
        registry.register(
            "repodrive_deploy_upload_bytes",
            "Total archive bytes accepted for deployment",
            deploy_upload_bytes.clone(),
        );

        let advisory_rejections_total = Counter::default();
        registry.register(
            "repodrive_advisory_rejections",
            "Command sequences rejected before remote execution",
            advisory_rejections_total.clone(),
        );

        Self {
            operations_total,
            operation_duration_seconds,
            deploys_total,
            deploy_upload_bytes,
            advisory_rejections_total,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in `AppState`.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all agent metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_encode_as_openmetrics_text() {
        let handle = MetricsRegistry::new();
        handle
            .metrics
            .operations_total
            .get_or_create(&OperationLabels {
                operation: "branches".into(),
                outcome: "ok".into(),
            })
            .inc();
        handle.metrics.deploy_upload_bytes.inc_by(1024);

        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &handle.registry)
            .expect("encode metrics");
        assert!(buf.contains("repodrive_operations_total"));
        assert!(buf.contains("repodrive_deploy_upload_bytes_total 1024"));
        assert!(buf.contains("repodrive_operation_duration_seconds"));
    }
}
