use std::sync::Arc;

use crate::client::ReplicaApi;
use crate::controller::config::ReconcilerConfig;
use crate::metrics::Metrics;

/// Dependencies shared by every reconciliation
#[derive(Clone)]
pub struct Context {
    /// Remote replica API, shared across concurrent reconciliations
    pub api: Arc<dyn ReplicaApi>,
    pub config: ReconcilerConfig,
    /// Metrics (optional, absent in most tests)
    pub metrics: Option<Arc<Metrics>>,
}

impl Context {
    pub fn new(api: Arc<dyn ReplicaApi>, config: ReconcilerConfig) -> Self {
        Self {
            api,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
