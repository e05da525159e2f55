//! Reconciliation logic for database replicas
//!
//! Translates desired configuration and observed remote state into the
//! minimal sequence of remote calls, and remote responses back into the
//! persisted `ObservedState`. Each operation is one causal chain:
//! mutate, poll until a terminal status, read back.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ApiError, RemoteReplicaRecord, ReplicaApi, ReplicaCreateRequest};
use crate::controller::context::Context;
use crate::controller::diff::{self, ChangePlan, PlanAction, detect_drift};
use crate::controller::error::{Error, ReplacementStage, Result};
use crate::controller::locks::ResourceLocks;
use crate::controller::poller::{ConvergencePoller, cancellable};
use crate::controller::schema::validate_config;
use crate::controller::state_machine::{
    ReplicaEvent, ReplicaStateMachine, TransitionContext, TransitionResult, determine_event,
};
use crate::model::{DesiredConfig, ObservedState, ReplicaId, ReplicaPhase, Sensitive};

/// Map a wire record into observed state
pub fn observe(cluster_id: &str, record: RemoteReplicaRecord) -> ObservedState {
    let public = record.connection.unwrap_or_default();
    let private = record.private_connection.unwrap_or_default();

    ObservedState {
        id: record.id,
        cluster_id: cluster_id.to_string(),
        name: record.name,
        region: record.region,
        size: record.size,
        tags: record.tags.unwrap_or_default().into_iter().collect(),
        private_network_uuid: record.private_network_uuid.filter(|uuid| !uuid.is_empty()),
        host: public.host,
        private_host: private.host,
        port: public.port,
        user: public.user,
        password: Sensitive::new(public.password),
        database: public.database,
        uri: Sensitive::new(public.uri),
        private_uri: Sensitive::new(private.uri),
        status: record.status,
        created_at: record.created_at,
    }
}

/// Drives the replica lifecycle against the remote API
pub struct Reconciler {
    ctx: Arc<Context>,
    poller: ConvergencePoller,
    machine: ReplicaStateMachine,
    locks: ResourceLocks,
}

impl Reconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        let poller = ConvergencePoller::new(
            ctx.config.poll_interval,
            ctx.config.max_transient_errors,
        )
        .with_metrics(ctx.metrics.clone());

        Self {
            ctx,
            poller,
            machine: ReplicaStateMachine::new(),
            locks: ResourceLocks::new(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    fn api(&self) -> &dyn ReplicaApi {
        self.ctx.api.as_ref()
    }

    /// Create a replica and wait until it is online
    #[instrument(skip(self, desired, cancel), fields(replica = %desired.id()))]
    pub async fn create(
        &self,
        desired: &DesiredConfig,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        self.measured("create", async {
            validate_config(desired)?;
            let id = desired.id();
            let _guard = self.locks.acquire(&id).await;

            self.advance(
                &id,
                ReplicaPhase::Absent,
                ReplicaEvent::CreateRequested,
                &TransitionContext::new(),
            )?;
            self.provision(desired, cancel).await
        })
        .await
    }

    /// Read the replica's current remote state
    ///
    /// Returns `Error::NotFound` when the replica (or its parent cluster) no
    /// longer exists.
    pub async fn read(&self, id: &ReplicaId) -> Result<ObservedState> {
        self.measured("read", async {
            let record = self.api().get_replica(&id.cluster_id, &id.name).await?;
            Ok::<_, Error>(observe(&id.cluster_id, record))
        })
        .await
    }

    /// Re-read a persisted replica, keeping secrets the remote no longer returns
    ///
    /// `None` means the replica was deleted out of band and local state is stale.
    #[instrument(skip(self, previous), fields(replica = %previous.replica_id()))]
    pub async fn refresh(&self, previous: &ObservedState) -> Result<Option<ObservedState>> {
        let id = previous.replica_id();
        match self.read(&id).await {
            Ok(mut state) => {
                state.preserve_sensitive_from(previous);
                for change in detect_drift(previous, &state) {
                    warn!(
                        replica = %id,
                        attribute = %change.attribute,
                        persisted = %change.old,
                        remote = %change.new,
                        "drift detected"
                    );
                }
                Ok(Some(state))
            }
            Err(err) if err.is_not_found() => {
                warn!(replica = %id, "replica no longer exists remotely");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Adopt an existing replica by identity
    pub async fn import(&self, id: &ReplicaId, cancel: &CancellationToken) -> Result<ObservedState> {
        let state = self.read(id).await?;
        if state.status.is_failed() {
            return Err(Error::RemoteFailed(format!(
                "replica {} is in failed state and cannot be imported",
                id
            )));
        }
        if state.status.is_ready() {
            info!(replica = %id, "imported replica");
            return Ok(state);
        }

        debug!(replica = %id, status = %state.status, "imported replica is still converging");
        let mut ready = self
            .poller
            .wait_until_ready(self.api(), id, self.ctx.config.timeouts.create, cancel)
            .await?;
        ready.preserve_sensitive_from(&state);
        Ok(ready)
    }

    /// Apply an update plan in place and wait for the replica to settle
    ///
    /// Every update is treated as potentially asynchronous on the remote side,
    /// so convergence polling always runs afterwards.
    #[instrument(skip(self, previous, plan, cancel), fields(replica = %previous.replica_id()))]
    pub async fn update(
        &self,
        previous: &ObservedState,
        plan: &ChangePlan,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        self.measured("update", async {
            if plan.action != PlanAction::Update {
                return Err(Error::InvalidTransition(format!(
                    "update requires an update plan, got {:?}",
                    plan.action
                )));
            }

            let id = previous.replica_id();
            let request = plan.update_request();
            let _guard = self.locks.acquire(&id).await;

            self.advance(
                &id,
                previous.phase(),
                ReplicaEvent::UpdateRequested,
                &TransitionContext::new(),
            )?;
            info!(
                replica = %id,
                attributes = ?plan.changed_attributes(),
                "updating replica in place"
            );

            cancellable(cancel, "updating replica", async {
                self.api()
                    .update_replica(&id.cluster_id, &id.name, &request)
                    .await
                    .map_err(Error::from)
            })
            .await?;

            let mut state = self
                .converge(
                    &id,
                    ReplicaPhase::Updating,
                    self.ctx.config.timeouts.update,
                    cancel,
                )
                .await?;
            state.preserve_sensitive_from(previous);
            Ok::<_, Error>(state)
        })
        .await
    }

    /// Delete a replica and wait until reads report it gone
    ///
    /// Deleting a replica that does not exist succeeds.
    #[instrument(skip(self, cancel), fields(replica = %id))]
    pub async fn delete(&self, id: &ReplicaId, cancel: &CancellationToken) -> Result<()> {
        self.measured("delete", async {
            let _guard = self.locks.acquire(id).await;
            self.delete_locked(id, cancel).await
        })
        .await
    }

    /// Delete a persisted replica, tracking the lifecycle transition
    pub async fn destroy(&self, state: &ObservedState, cancel: &CancellationToken) -> Result<()> {
        let id = state.replica_id();
        let phase = self.advance(
            &id,
            state.phase(),
            ReplicaEvent::DeleteRequested,
            &TransitionContext::new(),
        )?;
        self.delete(&id, cancel).await?;
        self.advance(&id, phase, ReplicaEvent::Deleted, &TransitionContext::new())?;
        Ok(())
    }

    /// Delete the previous replica, then create its replacement
    ///
    /// The create is never attempted when the delete fails. Either failure is
    /// reported as `ReplacementFailed` naming the stage that broke.
    #[instrument(skip_all, fields(replica = %previous.replica_id()))]
    pub async fn destroy_and_recreate(
        &self,
        previous: &ObservedState,
        desired: &DesiredConfig,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        self.measured("replace", async {
            validate_config(desired)?;
            let old_id = previous.replica_id();
            let new_id = desired.id();

            let phase = self.advance(
                &old_id,
                previous.phase(),
                ReplicaEvent::ReplaceRequested,
                &TransitionContext::new(),
            )?;

            {
                let _guard = self.locks.acquire(&old_id).await;
                if let Err(err) = self.delete_locked(&old_id, cancel).await {
                    error!(
                        replica = %old_id,
                        error = %err,
                        "replacement aborted, old replica could not be deleted"
                    );
                    return Err(Error::ReplacementFailed {
                        id: old_id.to_string(),
                        stage: ReplacementStage::Delete,
                        source: Box::new(err),
                    });
                }
            }

            self.advance(
                &new_id,
                phase,
                ReplicaEvent::PredecessorDeleted,
                &TransitionContext::new(),
            )?;

            let _guard = self.locks.acquire(&new_id).await;
            self.provision(desired, cancel).await.map_err(|err| {
                error!(
                    replica = %new_id,
                    error = %err,
                    "replacement incomplete, old replica deleted but new one not ready"
                );
                Error::ReplacementFailed {
                    id: new_id.to_string(),
                    stage: ReplacementStage::Create,
                    source: Box::new(err),
                }
            })
        })
        .await
    }

    /// Run one full reconciliation pass
    ///
    /// Refreshes `previous`, plans against `desired` and dispatches to create,
    /// update or replace. A previous state that vanished remotely is recreated.
    #[instrument(skip_all, fields(replica = %desired.id()))]
    pub async fn apply(
        &self,
        previous: Option<&ObservedState>,
        desired: &DesiredConfig,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        validate_config(desired)?;

        let current = match previous {
            Some(prev) => self.refresh(prev).await?,
            None => None,
        };
        let Some(current) = current else {
            if previous.is_some() {
                info!("replica was deleted out of band, recreating");
            }
            return self.create(desired, cancel).await;
        };

        let mut current = current;
        let mut plan = diff::plan(Some(&current), desired);
        if plan.action != PlanAction::NoOp && current.phase().is_converging() {
            info!(
                phase = %current.phase(),
                action = ?plan.action,
                "replica is still converging, waiting before applying changes"
            );
            current = self.resume_convergence(&current, cancel).await?;
            plan = diff::plan(Some(&current), desired);
        }

        let phase = current.phase();
        debug!(%phase, action = ?plan.action, "planned reconciliation");

        match plan.action {
            PlanAction::Create => self.create(desired, cancel).await,
            PlanAction::Update => self.update(&current, &plan, cancel).await,
            PlanAction::Replace => self.destroy_and_recreate(&current, desired, cancel).await,
            PlanAction::NoOp => {
                let id = current.replica_id();
                let event = determine_event(phase, plan.action);
                if event == ReplicaEvent::ConvergenceResumed {
                    return self.resume_convergence(&current, cancel).await;
                }
                self.advance(&id, phase, event, &TransitionContext::with_status(current.status))?;
                Ok(current)
            }
        }
    }

    /// List the replicas of a cluster
    pub async fn list(&self, cluster_id: &str) -> Result<Vec<ObservedState>> {
        let records = self.api().list_replicas(cluster_id).await?;
        Ok(records
            .into_iter()
            .map(|record| observe(cluster_id, record))
            .collect())
    }

    /// Issue the create call and wait for the replica to come online
    async fn provision(
        &self,
        desired: &DesiredConfig,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        let id = desired.id();
        let request = ReplicaCreateRequest {
            name: desired.name.clone(),
            region: desired.region.clone(),
            size: desired.size.clone(),
            tags: desired.tags.iter().cloned().collect(),
            private_network_uuid: desired.private_network_uuid.clone(),
        };

        let created = cancellable(cancel, "creating replica", async {
            self.api()
                .create_replica(&id.cluster_id, &request)
                .await
                .map_err(|err| match err {
                    ApiError::NotFound(msg) => {
                        Error::RemoteRejected(format!("parent cluster not found: {}", msg))
                    }
                    other => other.into(),
                })
        })
        .await?;

        let provisional = observe(&id.cluster_id, created);
        info!(
            replica = %id,
            remote_id = %provisional.id,
            status = %provisional.status,
            "create accepted"
        );

        let mut state = self
            .converge(
                &id,
                ReplicaPhase::Creating,
                self.ctx.config.timeouts.create,
                cancel,
            )
            .await
            .inspect_err(|err| {
                if matches!(err, Error::Cancelled(_) | Error::Timeout { .. }) {
                    warn!(
                        replica = %id,
                        "replica may be partially provisioned and was left in place"
                    );
                }
            })?;
        state.preserve_sensitive_from(&provisional);
        Ok(state)
    }

    /// Pick up polling a replica left in a transitional phase
    async fn resume_convergence(
        &self,
        current: &ObservedState,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        let id = current.replica_id();
        let phase = current.phase();
        self.advance(
            &id,
            phase,
            ReplicaEvent::ConvergenceResumed,
            &TransitionContext::with_status(current.status),
        )?;

        let timeout = match phase {
            ReplicaPhase::Updating => self.ctx.config.timeouts.update,
            _ => self.ctx.config.timeouts.create,
        };
        let _guard = self.locks.acquire(&id).await;
        let mut state = self.converge(&id, phase, timeout, cancel).await?;
        state.preserve_sensitive_from(current);
        Ok(state)
    }

    /// Poll until ready, recording the terminal transition
    async fn converge(
        &self,
        id: &ReplicaId,
        phase: ReplicaPhase,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        match self
            .poller
            .wait_until_ready(self.api(), id, timeout, cancel)
            .await
        {
            Ok(state) => {
                self.advance(
                    id,
                    phase,
                    ReplicaEvent::BecameReady,
                    &TransitionContext::with_status(state.status),
                )?;
                Ok(state)
            }
            Err(err @ Error::RemoteFailed(_)) => {
                self.advance(
                    id,
                    phase,
                    ReplicaEvent::ProvisioningFailed,
                    &TransitionContext::with_status(crate::model::ReplicaStatus::Failed),
                )?;
                error!(replica = %id, "replica entered failed state; delete it to recover");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_locked(&self, id: &ReplicaId, cancel: &CancellationToken) -> Result<()> {
        let deleted = cancellable(cancel, "deleting replica", async {
            Ok::<_, Error>(self.api().delete_replica(&id.cluster_id, &id.name).await)
        })
        .await?;

        match deleted {
            Ok(()) => info!(replica = %id, "delete accepted"),
            Err(err) if err.is_not_found() => {
                info!(replica = %id, "replica already absent");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        self.poller
            .wait_until_gone(self.api(), id, self.ctx.config.timeouts.delete, cancel)
            .await
    }

    fn advance(
        &self,
        id: &ReplicaId,
        current: ReplicaPhase,
        event: ReplicaEvent,
        ctx: &TransitionContext,
    ) -> Result<ReplicaPhase> {
        match self.machine.transition(current, event, ctx) {
            TransitionResult::Success {
                from,
                to,
                description,
                ..
            } => {
                info!(replica = %id, %from, %to, %event, "{}", description);
                Ok(to)
            }
            TransitionResult::InvalidTransition { current, event }
                if current == ReplicaPhase::Failed =>
            {
                Err(Error::RemoteFailed(format!(
                    "replica {} is in failed state and must be deleted before {}",
                    id, event
                )))
            }
            TransitionResult::InvalidTransition { current, event } => {
                Err(Error::InvalidTransition(format!(
                    "{} cannot handle {} while {}",
                    id, event, current
                )))
            }
            TransitionResult::GuardFailed {
                from, to, reason, ..
            } => Err(Error::InvalidTransition(format!(
                "{}: {} -> {} blocked: {}",
                id, from, to, reason
            ))),
        }
    }

    async fn measured<T, F>(&self, operation: &'static str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = future.await;
        if let Some(metrics) = &self.ctx.metrics {
            let outcome = match &result {
                Ok(_) => "success",
                Err(err) => err.kind(),
            };
            metrics.record_operation(operation, outcome, start.elapsed().as_secs_f64());
        }
        result
    }
}
