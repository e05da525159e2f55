pub mod client;
pub mod controller;
pub mod metrics;
pub mod model;

pub use client::{ApiError, InMemoryReplicaService, RemoteReplicaRecord, ReplicaApi};
pub use controller::{
    BackoffConfig, ChangePlan, Context, Error, PlanAction, Reconciler, ReconcilerConfig,
    ReplacementStage, Result, validate_config,
};
pub use metrics::Metrics;
pub use model::{DesiredConfig, ObservedState, ReplicaId, ReplicaPhase, ReplicaStatus, Sensitive};
