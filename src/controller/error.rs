//! Error types for the replica reconciler

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::client::ApiError;

/// Step of a destroy-then-recreate that did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementStage {
    /// The old replica could not be deleted; the create was never attempted
    Delete,
    /// The old replica is gone but the new one was not created
    Create,
}

impl fmt::Display for ReplacementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementStage::Delete => write!(f, "delete"),
            ReplacementStage::Create => write!(f, "create"),
        }
    }
}

/// Error variants are named with the `Error` suffix for clarity (e.g., `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Remote service rejected the request: {0}")]
    RemoteRejected(String),

    #[error("Transient error (will retry): {0}")]
    TransientError(String),

    #[error("Timed out after {waited:?} waiting for {id} (last status: {last_status})")]
    Timeout {
        id: String,
        waited: Duration,
        last_status: String,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Remote provisioning failed: {0}")]
    RemoteFailed(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    #[error(
        "Replacement of {id} failed during {stage}; manual reconciliation required: {source}"
    )]
    ReplacementFailed {
        id: String,
        stage: ReplacementStage,
        #[source]
        source: Box<Error>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates the replica does not exist remotely
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ValidationError(_) => "validation",
            Error::InvalidConfig(_) => "invalid_config",
            Error::RemoteRejected(_) => "rejected",
            Error::TransientError(_) => "transient",
            Error::Timeout { .. } => "timeout",
            Error::NotFound(_) => "not_found",
            Error::RemoteFailed(_) => "remote_failed",
            Error::Cancelled(_) => "cancelled",
            Error::InvalidTransition(_) => "invalid_transition",
            Error::ReplacementFailed { .. } => "replacement_failed",
            Error::SerializationError(_) => "serialization",
        }
    }

    /// Check if this error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TransientError(_) => true,
            // Inconclusive: the replica may still be provisioning
            Error::Timeout { .. } => true,
            Error::ValidationError(_) => false,
            Error::InvalidConfig(_) => false,
            Error::RemoteRejected(_) => false,
            Error::NotFound(_) => false,
            Error::RemoteFailed(_) => false,
            Error::Cancelled(_) => false,
            Error::InvalidTransition(_) => false,
            // Partial replacement needs an operator
            Error::ReplacementFailed { .. } => false,
            Error::SerializationError(_) => false,
        }
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound(msg) => Error::NotFound(msg),
            ApiError::Conflict(msg) => Error::RemoteRejected(format!("conflict: {}", msg)),
            ApiError::Rejected { status, message } => {
                Error::RemoteRejected(format!("{} ({})", message, status))
            }
            ApiError::Transient(msg) => Error::TransientError(msg),
            ApiError::Fatal(msg) => Error::RemoteRejected(msg),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Retry schedule for callers re-running a failed reconciliation
///
/// The reconciler never loops on transient errors itself.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Fraction of the delay randomised in either direction
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Jittered delay for zero-based `attempt`, capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Delay before retrying after `error`, or `None` when it must not be retried
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Option<Duration> {
        if error.is_retryable() {
            Some(self.delay_for_attempt(attempt))
        } else {
            None
        }
    }
}

/// Consecutive failed reads while waiting on one replica
#[derive(Clone, Debug, Default)]
pub struct ErrorContext {
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

impl ErrorContext {
    pub fn record_error(&mut self, error: &Error) {
        self.consecutive_errors += 1;
        self.last_error = Some(error.to_string());
    }

    /// Called after a read succeeds
    pub fn reset(&mut self) {
        self.consecutive_errors = 0;
        self.last_error = None;
    }

    /// More than `max_retries` reads in a row have failed
    pub fn exceeded_max_retries(&self, max_retries: u32) -> bool {
        self.consecutive_errors > max_retries
    }
}
