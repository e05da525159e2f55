//! Remote client facade for the managed-database replica API
//!
//! The HTTP transport, authentication and request-level retries live behind
//! this trait. The reconciler only sees typed records and classified errors.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::model::ReplicaStatus;

pub use memory::InMemoryReplicaService;

/// Errors reported by the remote service, already classified
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

/// Connection details for one endpoint (public or private) of a replica
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionInfo {
    pub uri: String,
    pub database: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub ssl: bool,
}

/// Wire-level replica record as returned by the remote service
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteReplicaRecord {
    pub id: String,
    pub name: String,
    pub region: String,
    pub size: String,
    pub status: ReplicaStatus,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub private_network_uuid: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub connection: Option<ConnectionInfo>,
    #[serde(default)]
    pub private_connection: Option<ConnectionInfo>,
}

/// Body of a create-replica call
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicaCreateRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network_uuid: Option<String>,
}

/// Body of an in-place update call; only changed attributes are set
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicaUpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl ReplicaUpdateRequest {
    pub fn is_empty(&self) -> bool {
        self.size.is_none() && self.tags.is_none()
    }
}

/// Typed operations against the remote replica API
///
/// Implementations must be safe to share between concurrent reconciliations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReplicaApi: Send + Sync {
    /// Create a replica of `cluster_id`
    async fn create_replica(
        &self,
        cluster_id: &str,
        request: &ReplicaCreateRequest,
    ) -> Result<RemoteReplicaRecord, ApiError>;

    /// Fetch a replica by name
    async fn get_replica(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> Result<RemoteReplicaRecord, ApiError>;

    /// Apply an in-place change to a replica
    async fn update_replica(
        &self,
        cluster_id: &str,
        name: &str,
        request: &ReplicaUpdateRequest,
    ) -> Result<RemoteReplicaRecord, ApiError>;

    /// Delete a replica
    async fn delete_replica(&self, cluster_id: &str, name: &str) -> Result<(), ApiError>;

    /// List all replicas of a cluster
    async fn list_replicas(&self, cluster_id: &str) -> Result<Vec<RemoteReplicaRecord>, ApiError>;
}
