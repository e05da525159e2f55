//! Convergence poller
//!
//! After a mutating call the remote replica is read at a fixed interval until
//! it reaches a ready or failed terminal status, or the deadline passes. The
//! first read happens immediately. Transient read errors are tolerated up to
//! a bounded number of consecutive occurrences.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{ApiError, ReplicaApi};
use crate::controller::error::{Error, ErrorContext, Result};
use crate::controller::reconciler::observe;
use crate::metrics::Metrics;
use crate::model::{ObservedState, ReplicaId};

/// Race `future` against the cancellation signal
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, what: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled(what.to_string())),
        result = future => result,
    }
}

#[derive(Clone)]
pub struct ConvergencePoller {
    poll_interval: Duration,
    max_transient_errors: u32,
    metrics: Option<Arc<Metrics>>,
}

impl ConvergencePoller {
    pub fn new(poll_interval: Duration, max_transient_errors: u32) -> Self {
        Self {
            poll_interval,
            max_transient_errors,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until the replica reports a ready status
    ///
    /// Returns the latest snapshot on success, `RemoteFailed` on a failure
    /// status and `Timeout` once `timeout` has elapsed.
    pub async fn wait_until_ready(
        &self,
        api: &dyn ReplicaApi,
        id: &ReplicaId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut errors = ErrorContext::default();
        let mut last_status = String::from("unknown");

        loop {
            self.record_poll();
            let read = cancellable(cancel, "waiting for replica", async {
                Ok::<_, Error>(api.get_replica(&id.cluster_id, &id.name).await)
            })
            .await?;

            match read {
                Ok(record) => {
                    errors.reset();
                    let state = observe(&id.cluster_id, record);
                    if state.status.is_ready() {
                        debug!(replica = %id, "replica is ready");
                        return Ok(state);
                    }
                    if state.status.is_failed() {
                        return Err(Error::RemoteFailed(format!(
                            "replica {} reported status failed",
                            id
                        )));
                    }
                    debug!(replica = %id, status = %state.status, "replica not ready yet");
                    last_status = state.status.to_string();
                }
                // A replica can briefly be invisible right after it was created
                Err(err) if err.is_transient() || err.is_not_found() => {
                    self.tolerate(&mut errors, id, err)?;
                }
                Err(err) => return Err(err.into()),
            }

            self.pause(id, started, deadline, &last_status, cancel)
                .await?;
        }
    }

    /// Wait until reads of the replica return not-found
    pub async fn wait_until_gone(
        &self,
        api: &dyn ReplicaApi,
        id: &ReplicaId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut errors = ErrorContext::default();
        let mut last_status = String::from("unknown");

        loop {
            self.record_poll();
            let read = cancellable(cancel, "waiting for replica deletion", async {
                Ok::<_, Error>(api.get_replica(&id.cluster_id, &id.name).await)
            })
            .await?;

            match read {
                Err(err) if err.is_not_found() => {
                    debug!(replica = %id, "replica is gone");
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    self.tolerate(&mut errors, id, err)?;
                }
                Err(err) => return Err(err.into()),
                Ok(record) => {
                    errors.reset();
                    debug!(replica = %id, status = %record.status, "replica still present");
                    last_status = record.status.to_string();
                }
            }

            self.pause(id, started, deadline, &last_status, cancel)
                .await?;
        }
    }

    fn tolerate(&self, errors: &mut ErrorContext, id: &ReplicaId, err: ApiError) -> Result<()> {
        let err = Error::TransientError(err.to_string());
        errors.record_error(&err);
        warn!(
            replica = %id,
            consecutive = errors.consecutive_errors,
            error = %err,
            "transient error while polling replica"
        );
        if errors.exceeded_max_retries(self.max_transient_errors) {
            return Err(Error::TransientError(format!(
                "{} consecutive errors while polling {}: {}",
                errors.consecutive_errors,
                id,
                errors.last_error.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(())
    }

    /// Sleep one interval, or fail if the next read would land past the deadline
    async fn pause(
        &self,
        id: &ReplicaId,
        started: Instant,
        deadline: Instant,
        last_status: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if Instant::now() + self.poll_interval > deadline {
            return Err(Error::Timeout {
                id: id.to_string(),
                waited: started.elapsed(),
                last_status: last_status.to_string(),
            });
        }
        cancellable(cancel, "waiting for replica", async {
            sleep(self.poll_interval).await;
            Ok::<_, Error>(())
        })
        .await
    }

    fn record_poll(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_poll();
        }
    }
}
