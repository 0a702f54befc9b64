use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use tokio::time::Instant;

use crate::contract::lib::Error;
use crate::controller::v1::crd::cluster_csi_driver::ManagementState;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub error: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StateLabels {
    pub state: String,
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Counter,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: Histogram,
    pub sync_state: Family<StateLabels, Gauge>,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Counter::default(),
            failures: Family::<ErrorLabels, Counter>::default(),
            duration: Histogram::new([0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.].into_iter()),
            sync_state: Family::<StateLabels, Gauge>::default(),
        }
    }
}

impl ReconcileMetrics {
    pub fn register(self, registry: &mut Registry) -> Self {
        registry.register_with_unit(
            "duration",
            "reconcile duration",
            prometheus_client::registry::Unit::Seconds,
            self.duration.clone(),
        );
        registry.register("failures", "reconciliation errors", self.failures.clone());
        registry.register("runs", "reconciliations", self.runs.clone());
        registry.register(
            "sync_state",
            "management state used for conditional resources",
            self.sync_state.clone(),
        );
        self
    }

    pub fn set_failure(&self, error: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                error: error.metric_label(),
            })
            .inc();
    }

    /// Exactly one state gauge is 1 at a time.
    pub fn set_sync_state(&self, state: ManagementState) {
        for candidate in [
            ManagementState::Managed,
            ManagementState::Unmanaged,
            ManagementState::Removed,
            ManagementState::Force,
        ] {
            let value = if candidate == state { 1 } else { 0 };
            self.sync_state
                .get_or_create(&StateLabels {
                    state: candidate.to_string(),
                })
                .set(value);
        }
    }

    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        self.runs.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.duration.clone(),
        }
    }
}

/// Records the reconcile duration when dropped.
pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.observe(duration);
    }
}

#[derive(Clone)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
    pub registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("secrets_store_csi_driver_operator_reconcile");
        let reconcile = ReconcileMetrics::default().register(&mut registry);
        Self {
            registry: Arc::new(registry),
            reconcile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    fn encoded(metrics: &Metrics) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry).unwrap();
        buffer
    }

    #[test]
    fn failures_are_labelled_by_error() {
        let metrics = Metrics::default();
        metrics.reconcile.set_failure(&Error::CrdNotInstalled);
        metrics.reconcile.set_failure(&Error::CrdNotInstalled);

        let text = encoded(&metrics);
        assert!(text.contains("secrets_store_csi_driver_operator_reconcile_failures_total{error=\"crdnotinstalled\"} 2"));
    }

    #[test]
    fn only_current_sync_state_is_set() {
        let metrics = Metrics::default();
        metrics.reconcile.set_sync_state(ManagementState::Removed);

        let text = encoded(&metrics);
        assert!(text.contains("sync_state{state=\"Removed\"} 1"));
        assert!(text.contains("sync_state{state=\"Managed\"} 0"));
    }

    #[test]
    fn measurer_counts_runs() {
        let metrics = Metrics::default();
        drop(metrics.reconcile.count_and_measure());
        assert_eq!(metrics.reconcile.runs.get(), 1);
    }
}
