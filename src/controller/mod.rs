pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod locks;
pub mod poller;
pub mod reconciler;
pub mod schema;
pub mod state_machine;

pub use config::{OperationTimeouts, ReconcilerConfig};
pub use context::Context;
pub use diff::{AttributeChange, AttributeValue, ChangeAction, ChangePlan, PlanAction, detect_drift, plan};
pub use error::{BackoffConfig, Error, ErrorContext, ReplacementStage, Result};
pub use locks::ResourceLocks;
pub use poller::ConvergencePoller;
pub use reconciler::{Reconciler, observe};
pub use schema::{Attribute, AttributeSpec, Mutability, REPLICA_SCHEMA, validate_config};
pub use state_machine::{ReplicaEvent, ReplicaStateMachine, TransitionContext, TransitionResult};
