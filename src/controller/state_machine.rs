//! Finite state machine for the replica lifecycle
//!
//! `Absent -> Creating -> Ready -> {Updating -> Ready | Replacing -> Creating}
//! -> Deleting -> Absent`, plus a terminal `Failed` state reachable while the
//! remote side is provisioning. Only deletion leaves `Failed`.

use std::fmt;

use crate::controller::diff::PlanAction;
use crate::model::{ReplicaPhase, ReplicaStatus};

/// Events that trigger state transitions in the replica lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicaEvent {
    /// A create call is about to be issued
    CreateRequested,
    /// Remote status reached the ready terminal
    BecameReady,
    /// Remote status reached the failure terminal
    ProvisioningFailed,
    /// Mutable attributes changed
    UpdateRequested,
    /// An immutable attribute changed
    ReplaceRequested,
    /// The replaced replica is gone; its successor is being created
    PredecessorDeleted,
    /// Previous pass left the replica converging; wait again
    ConvergenceResumed,
    /// Nothing to change
    Unchanged,
    DeleteRequested,
    /// Remote confirmed the replica no longer exists
    Deleted,
}

impl fmt::Display for ReplicaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaEvent::CreateRequested => write!(f, "CreateRequested"),
            ReplicaEvent::BecameReady => write!(f, "BecameReady"),
            ReplicaEvent::ProvisioningFailed => write!(f, "ProvisioningFailed"),
            ReplicaEvent::UpdateRequested => write!(f, "UpdateRequested"),
            ReplicaEvent::ReplaceRequested => write!(f, "ReplaceRequested"),
            ReplicaEvent::PredecessorDeleted => write!(f, "PredecessorDeleted"),
            ReplicaEvent::ConvergenceResumed => write!(f, "ConvergenceResumed"),
            ReplicaEvent::Unchanged => write!(f, "Unchanged"),
            ReplicaEvent::DeleteRequested => write!(f, "DeleteRequested"),
            ReplicaEvent::Deleted => write!(f, "Deleted"),
        }
    }
}

/// Context information available during state transitions
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Latest remote status, if one has been observed
    pub status: Option<ReplicaStatus>,
}

impl TransitionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: ReplicaStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

#[derive(Debug)]
pub struct Transition {
    pub from: ReplicaPhase,
    pub to: ReplicaPhase,
    pub event: ReplicaEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ReplicaPhase,
        to: ReplicaPhase,
        event: ReplicaEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    Success {
        from: ReplicaPhase,
        to: ReplicaPhase,
        event: ReplicaEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: ReplicaPhase,
        event: ReplicaEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: ReplicaPhase,
        to: ReplicaPhase,
        event: ReplicaEvent,
        reason: String,
    },
}

pub struct ReplicaStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ReplicaStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaStateMachine {
    pub fn new() -> Self {
        use ReplicaEvent as E;
        use ReplicaPhase as P;

        Self {
            transitions: vec![
                // === Absent ===
                Transition::new(P::Absent, P::Creating, E::CreateRequested, "Creating replica"),
                // === Creating ===
                Transition::new(P::Creating, P::Ready, E::BecameReady, "Replica is online"),
                Transition::new(
                    P::Creating,
                    P::Failed,
                    E::ProvisioningFailed,
                    "Replica provisioning failed",
                ),
                Transition::new(
                    P::Creating,
                    P::Creating,
                    E::ConvergenceResumed,
                    "Still waiting for replica to come online",
                ),
                Transition::new(
                    P::Creating,
                    P::Replacing,
                    E::ReplaceRequested,
                    "Immutable attribute changed while creating",
                ),
                Transition::new(
                    P::Creating,
                    P::Deleting,
                    E::DeleteRequested,
                    "Deletion requested while creating",
                ),
                // === Ready ===
                Transition::new(P::Ready, P::Ready, E::Unchanged, "Replica is up to date"),
                Transition::new(
                    P::Ready,
                    P::Updating,
                    E::UpdateRequested,
                    "Mutable attributes changed, updating in place",
                ),
                Transition::new(
                    P::Ready,
                    P::Replacing,
                    E::ReplaceRequested,
                    "Immutable attribute changed, replacing replica",
                ),
                Transition::new(
                    P::Ready,
                    P::Failed,
                    E::ProvisioningFailed,
                    "Remote reports replica failed",
                ),
                Transition::new(P::Ready, P::Deleting, E::DeleteRequested, "Deleting replica"),
                // === Updating ===
                Transition::new(P::Updating, P::Ready, E::BecameReady, "Update completed"),
                Transition::new(
                    P::Updating,
                    P::Failed,
                    E::ProvisioningFailed,
                    "Update failed remotely",
                ),
                Transition::new(
                    P::Updating,
                    P::Updating,
                    E::ConvergenceResumed,
                    "Still waiting for update to settle",
                ),
                Transition::new(
                    P::Updating,
                    P::Deleting,
                    E::DeleteRequested,
                    "Deletion requested while updating",
                ),
                // === Replacing ===
                Transition::new(
                    P::Replacing,
                    P::Creating,
                    E::PredecessorDeleted,
                    "Old replica deleted, creating replacement",
                ),
                // === Failed: only deletion clears it ===
                Transition::new(
                    P::Failed,
                    P::Deleting,
                    E::DeleteRequested,
                    "Deleting failed replica",
                ),
                // === Deleting ===
                Transition::new(P::Deleting, P::Absent, E::Deleted, "Replica deleted"),
            ],
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: ReplicaPhase,
        event: ReplicaEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: ReplicaPhase, event: ReplicaEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: ReplicaPhase) -> Vec<ReplicaEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            ReplicaEvent::BecameReady => match ctx.status {
                Some(status) if status.is_ready() => None,
                other => Some(format!(
                    "Replica is not ready (status: {})",
                    other.map(|s| s.as_str()).unwrap_or("unknown")
                )),
            },
            ReplicaEvent::ProvisioningFailed => match ctx.status {
                Some(status) if status.is_failed() => None,
                other => Some(format!(
                    "Replica has not failed (status: {})",
                    other.map(|s| s.as_str()).unwrap_or("unknown")
                )),
            },
            _ => None,
        }
    }
}

/// Determine the event for one reconciliation pass
pub fn determine_event(current: ReplicaPhase, action: PlanAction) -> ReplicaEvent {
    match action {
        PlanAction::Create => ReplicaEvent::CreateRequested,
        PlanAction::Replace => ReplicaEvent::ReplaceRequested,
        PlanAction::Update => ReplicaEvent::UpdateRequested,
        PlanAction::NoOp if current.is_converging() => ReplicaEvent::ConvergenceResumed,
        PlanAction::NoOp => ReplicaEvent::Unchanged,
    }
}
