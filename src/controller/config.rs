//! Reconciler configuration
//!
//! Defaults are tuned for managed-database provisioning, which routinely
//! takes several minutes. Every value can be overridden from the environment.

use std::time::Duration;

use crate::controller::error::{Error, Result};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_TRANSIENT_ERRORS: u32 = 5;
pub const DEFAULT_CREATE_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_UPDATE_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 10 * 60;

pub const ENV_POLL_INTERVAL: &str = "REPLICA_POLL_INTERVAL_SECS";
pub const ENV_MAX_TRANSIENT_ERRORS: &str = "REPLICA_MAX_TRANSIENT_ERRORS";
pub const ENV_CREATE_TIMEOUT: &str = "REPLICA_CREATE_TIMEOUT_SECS";
pub const ENV_UPDATE_TIMEOUT: &str = "REPLICA_UPDATE_TIMEOUT_SECS";
pub const ENV_DELETE_TIMEOUT: &str = "REPLICA_DELETE_TIMEOUT_SECS";

/// Per-operation convergence bounds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(DEFAULT_CREATE_TIMEOUT_SECS),
            update: Duration::from_secs(DEFAULT_UPDATE_TIMEOUT_SECS),
            delete: Duration::from_secs(DEFAULT_DELETE_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delay between convergence reads
    pub poll_interval: Duration,
    /// Consecutive transient read errors tolerated while polling
    pub max_transient_errors: u32,
    pub timeouts: OperationTimeouts,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_transient_errors: DEFAULT_MAX_TRANSIENT_ERRORS,
            timeouts: OperationTimeouts::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => parse_number::<u64>(key, &raw).map(Duration::from_secs),
                None => Ok(default),
            }
        };

        let poll_interval = secs(ENV_POLL_INTERVAL, defaults.poll_interval)?;
        if poll_interval.is_zero() {
            return Err(Error::InvalidConfig(format!(
                "{} must be greater than zero",
                ENV_POLL_INTERVAL
            )));
        }

        let max_transient_errors = match lookup(ENV_MAX_TRANSIENT_ERRORS) {
            Some(raw) => parse_number::<u32>(ENV_MAX_TRANSIENT_ERRORS, &raw)?,
            None => defaults.max_transient_errors,
        };

        Ok(Self {
            poll_interval,
            max_transient_errors,
            timeouts: OperationTimeouts {
                create: secs(ENV_CREATE_TIMEOUT, defaults.timeouts.create)?,
                update: secs(ENV_UPDATE_TIMEOUT, defaults.timeouts.update)?,
                delete: secs(ENV_DELETE_TIMEOUT, defaults.timeouts.delete)?,
            },
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} is not a valid number: {}", key, raw)))
}
