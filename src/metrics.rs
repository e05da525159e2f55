//! Prometheus metrics for replica reconciliation
//!
//! Exposed as OpenMetrics text through [`Metrics::encode`]; serving the text
//! is left to the embedding host.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Labels for per-operation outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OperationLabels {
    pub operation: String,
    pub outcome: String,
}

impl prometheus_client::encoding::EncodeLabelSet for OperationLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("operation", self.operation.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-operation duration metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DurationLabels {
    pub operation: String,
}

impl prometheus_client::encoding::EncodeLabelSet for DurationLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("operation", self.operation.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

pub struct Metrics {
    /// Operations by outcome ("success" or an error kind)
    pub operations_total: Family<OperationLabels, Counter>,
    /// Operation duration histogram, including convergence waits
    pub operation_duration_seconds: Family<DurationLabels, Histogram>,
    /// Convergence reads issued
    pub polls_total: Counter,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let operations_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "replica_operations",
            "Total number of replica lifecycle operations",
            operations_total.clone(),
        );

        let operation_duration_seconds =
            Family::<DurationLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 2.0, 18))
            });
        registry.register(
            "replica_operation_duration_seconds",
            "Duration of replica lifecycle operations in seconds",
            operation_duration_seconds.clone(),
        );

        let polls_total = Counter::default();
        registry.register(
            "replica_polls",
            "Total number of convergence reads",
            polls_total.clone(),
        );

        Self {
            operations_total,
            operation_duration_seconds,
            polls_total,
            registry,
        }
    }

    /// Record a finished operation
    pub fn record_operation(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.operations_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
        self.operation_duration_seconds
            .get_or_create(&DurationLabels {
                operation: operation.to_string(),
            })
            .observe(duration_secs);
    }

    pub fn record_poll(&self) {
        self.polls_total.inc();
    }

    /// Count of operations recorded with the given outcome
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
                outcome: outcome.to_string(),
            })
            .get()
    }

    /// Encode metrics to OpenMetrics text format
    ///
    /// Returns an empty string if encoding fails.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}
