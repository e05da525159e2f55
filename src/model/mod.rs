//! Resource model for managed-database read replicas
//!
//! `DesiredConfig` is what the operator declares, `ObservedState` is the last
//! known remote truth as persisted between reconciliation passes.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::controller::error::{Error, Result};

/// Identity of a replica: the parent cluster plus the replica name.
///
/// Both halves are immutable for the lifetime of the replica.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicaId {
    pub cluster_id: String,
    pub name: String,
}

impl ReplicaId {
    pub fn new(cluster_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            name: name.into(),
        }
    }

    /// Parse an import identifier of the form `cluster_id/name`
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once('/') {
            Some((cluster_id, name))
                if !cluster_id.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(cluster_id, name))
            }
            _ => Err(Error::ValidationError(format!(
                "replica id must have the form <cluster_id>/<name>: {}",
                raw
            ))),
        }
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster_id, self.name)
    }
}

/// Declared intent for a read replica
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct DesiredConfig {
    /// ID of the primary cluster this replica follows
    pub cluster_id: String,

    /// Replica name, unique within the cluster
    pub name: String,

    /// Region slug (e.g., "nyc3")
    pub region: String,

    /// Size slug (e.g., "db-s-2vcpu-4gb")
    pub size: String,

    /// Tags; order is insignificant and duplicates collapse
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// VPC the replica is placed on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network_uuid: Option<String>,
}

impl DesiredConfig {
    pub fn id(&self) -> ReplicaId {
        ReplicaId::new(&self.cluster_id, &self.name)
    }
}

/// Remote provisioning status of a replica
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaStatus {
    #[default]
    Creating,
    Online,
    Resizing,
    Migrating,
    Forking,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ReplicaStatus {
    /// Ready terminal: attributes are authoritative
    pub fn is_ready(&self) -> bool {
        matches!(self, ReplicaStatus::Online)
    }

    /// Permanent provisioning failure
    pub fn is_failed(&self) -> bool {
        matches!(self, ReplicaStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaStatus::Creating => "creating",
            ReplicaStatus::Online => "online",
            ReplicaStatus::Resizing => "resizing",
            ReplicaStatus::Migrating => "migrating",
            ReplicaStatus::Forking => "forking",
            ReplicaStatus::Failed => "failed",
            ReplicaStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a replica as tracked by the reconciler
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub enum ReplicaPhase {
    #[default]
    Absent,
    Creating,
    Ready,
    Updating,
    Replacing,
    Deleting,
    /// Permanent remote failure; only deletion clears it
    Failed,
}

impl ReplicaPhase {
    /// Phase implied by a persisted remote status
    pub fn from_status(status: ReplicaStatus) -> Self {
        match status {
            ReplicaStatus::Online => ReplicaPhase::Ready,
            ReplicaStatus::Failed => ReplicaPhase::Failed,
            ReplicaStatus::Resizing | ReplicaStatus::Migrating | ReplicaStatus::Forking => {
                ReplicaPhase::Updating
            }
            ReplicaStatus::Creating | ReplicaStatus::Unknown => ReplicaPhase::Creating,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplicaPhase::Absent | ReplicaPhase::Failed)
    }

    /// The remote is still working towards a settled status
    pub fn is_converging(&self) -> bool {
        matches!(self, ReplicaPhase::Creating | ReplicaPhase::Updating)
    }
}

impl fmt::Display for ReplicaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaPhase::Absent => write!(f, "Absent"),
            ReplicaPhase::Creating => write!(f, "Creating"),
            ReplicaPhase::Ready => write!(f, "Ready"),
            ReplicaPhase::Updating => write!(f, "Updating"),
            ReplicaPhase::Replacing => write!(f, "Replacing"),
            ReplicaPhase::Deleting => write!(f, "Deleting"),
            ReplicaPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// A secret value. Never printed by `Debug` or `Display`.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
#[serde(transparent)]
pub struct Sensitive(String);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("<redacted>")
        }
    }
}

impl fmt::Display for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Persisted state of a replica after a successful remote read
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ObservedState {
    /// Remote UUID of the replica
    pub id: String,
    pub cluster_id: String,
    pub name: String,
    pub region: String,
    pub size: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network_uuid: Option<String>,

    // Computed attributes
    pub host: String,
    pub private_host: String,
    pub port: u16,
    pub user: String,
    pub password: Sensitive,
    pub database: String,
    pub uri: Sensitive,
    pub private_uri: Sensitive,
    pub status: ReplicaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ObservedState {
    pub fn replica_id(&self) -> ReplicaId {
        ReplicaId::new(&self.cluster_id, &self.name)
    }

    pub fn phase(&self) -> ReplicaPhase {
        ReplicaPhase::from_status(self.status)
    }

    /// Project the configurable attributes back into a `DesiredConfig`
    pub fn config(&self) -> DesiredConfig {
        DesiredConfig {
            cluster_id: self.cluster_id.clone(),
            name: self.name.clone(),
            region: self.region.clone(),
            size: self.size.clone(),
            tags: self.tags.clone(),
            private_network_uuid: self.private_network_uuid.clone(),
        }
    }

    /// Keep secrets from a prior observation when the remote omitted them
    pub fn preserve_sensitive_from(&mut self, prior: &ObservedState) {
        if self.password.is_empty() {
            self.password = prior.password.clone();
        }
        if self.uri.is_empty() {
            self.uri = prior.uri.clone();
        }
        if self.private_uri.is_empty() {
            self.private_uri = prior.private_uri.clone();
        }
    }
}
