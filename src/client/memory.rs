//! In-memory simulation of the remote replica service
//!
//! Models the behaviours the reconciler has to cope with: asynchronous
//! provisioning, secrets that are only returned on create, eventual
//! disappearance after delete, and injected transient failures.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{
    ApiError, ConnectionInfo, RemoteReplicaRecord, ReplicaApi, ReplicaCreateRequest,
    ReplicaUpdateRequest,
};
use crate::model::{ReplicaId, ReplicaStatus};

const REPLICA_PORT: u16 = 25060;
const REPLICA_USER: &str = "doadmin";
const REPLICA_DATABASE: &str = "defaultdb";

/// A call received by the simulated service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Create(ReplicaId),
    Get(ReplicaId),
    Update(ReplicaId, ReplicaUpdateRequest),
    Delete(ReplicaId),
    List(String),
}

#[derive(Debug)]
struct SimulatedReplica {
    record: RemoteReplicaRecord,
    /// Reads left that still report a transitional status
    pending_polls: u32,
    /// Status reported once `pending_polls` is exhausted
    settles_to: ReplicaStatus,
    /// Reads left before a deleted replica disappears
    deleting: Option<u32>,
}

#[derive(Debug, Default)]
struct ServiceState {
    clusters: HashSet<String>,
    networks: HashSet<String>,
    default_network: Option<String>,
    replicas: HashMap<ReplicaId, SimulatedReplica>,
    provisioning_polls: u32,
    deletion_polls: u32,
    echo_secrets: bool,
    fail_next_provisioning: bool,
    get_errors: VecDeque<ApiError>,
    delete_errors: VecDeque<ApiError>,
    create_errors: VecDeque<ApiError>,
    calls: Vec<ApiCall>,
}

/// Simulated remote service implementing [`ReplicaApi`]
#[derive(Debug, Default)]
pub struct InMemoryReplicaService {
    state: Mutex<ServiceState>,
}

impl InMemoryReplicaService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a primary cluster replicas can be attached to
    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.state.get_mut().clusters.insert(cluster_id.into());
        self
    }

    /// Register a private network (VPC)
    pub fn with_network(mut self, network_id: impl Into<String>) -> Self {
        self.state.get_mut().networks.insert(network_id.into());
        self
    }

    /// Network assigned to replicas created without one, like a region's default VPC
    pub fn with_default_network(mut self, network_id: impl Into<String>) -> Self {
        let network_id = network_id.into();
        let state = self.state.get_mut();
        state.networks.insert(network_id.clone());
        state.default_network = Some(network_id);
        self
    }

    /// Number of reads reporting a transitional status after each mutation
    pub fn with_provisioning_polls(mut self, polls: u32) -> Self {
        self.state.get_mut().provisioning_polls = polls;
        self
    }

    /// Number of reads a deleted replica remains visible for
    pub fn with_deletion_polls(mut self, polls: u32) -> Self {
        self.state.get_mut().deletion_polls = polls;
        self
    }

    /// Return passwords on every read instead of only on create
    pub fn with_echoed_secrets(mut self) -> Self {
        self.state.get_mut().echo_secrets = true;
        self
    }

    /// The next created replica settles into `failed` instead of `online`
    pub async fn fail_next_provisioning(&self) {
        self.state.lock().await.fail_next_provisioning = true;
    }

    /// Queue errors returned by the next `get_replica` calls, in order
    pub async fn inject_get_errors(&self, errors: impl IntoIterator<Item = ApiError>) {
        self.state.lock().await.get_errors.extend(errors);
    }

    /// Queue an error returned by the next `delete_replica` call
    pub async fn inject_delete_error(&self, error: ApiError) {
        self.state.lock().await.delete_errors.push_back(error);
    }

    /// Queue an error returned by the next `create_replica` call
    pub async fn inject_create_error(&self, error: ApiError) {
        self.state.lock().await.create_errors.push_back(error);
    }

    /// Remove a primary cluster together with all of its replicas
    pub async fn remove_cluster(&self, cluster_id: &str) {
        let mut state = self.state.lock().await;
        state.clusters.remove(cluster_id);
        state.replicas.retain(|id, _| id.cluster_id != cluster_id);
    }

    /// Modify a replica behind the reconciler's back
    pub async fn modify_out_of_band<F>(&self, id: &ReplicaId, f: F) -> bool
    where
        F: FnOnce(&mut RemoteReplicaRecord),
    {
        let mut state = self.state.lock().await;
        match state.replicas.get_mut(id) {
            Some(replica) => {
                f(&mut replica.record);
                true
            }
            None => false,
        }
    }

    /// Whether the replica exists (including one still being deleted)
    pub async fn contains(&self, id: &ReplicaId) -> bool {
        self.state.lock().await.replicas.contains_key(id)
    }

    /// Calls received so far
    pub async fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().await.calls.clone()
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

fn connection(host: String, password: &str) -> ConnectionInfo {
    ConnectionInfo {
        uri: format!(
            "postgresql://{}:{}@{}:{}/{}?sslmode=require",
            REPLICA_USER, password, host, REPLICA_PORT, REPLICA_DATABASE
        ),
        database: REPLICA_DATABASE.to_string(),
        host,
        port: REPLICA_PORT,
        user: REPLICA_USER.to_string(),
        password: password.to_string(),
        ssl: true,
    }
}

fn strip_secrets(mut record: RemoteReplicaRecord) -> RemoteReplicaRecord {
    for conn in [&mut record.connection, &mut record.private_connection]
        .into_iter()
        .flatten()
    {
        conn.password.clear();
        conn.uri.clear();
    }
    record
}

fn is_known_size(size: &str) -> bool {
    size.starts_with("db-")
}

#[async_trait]
impl ReplicaApi for InMemoryReplicaService {
    async fn create_replica(
        &self,
        cluster_id: &str,
        request: &ReplicaCreateRequest,
    ) -> Result<RemoteReplicaRecord, ApiError> {
        let mut state = self.state.lock().await;
        let id = ReplicaId::new(cluster_id, &request.name);
        state.calls.push(ApiCall::Create(id.clone()));

        if let Some(err) = state.create_errors.pop_front() {
            return Err(err);
        }
        if !state.clusters.contains(cluster_id) {
            return Err(ApiError::NotFound(format!("cluster {}", cluster_id)));
        }
        if state.replicas.contains_key(&id) {
            return Err(ApiError::Conflict(format!("replica {} already exists", id)));
        }
        if !is_known_size(&request.size) {
            return Err(ApiError::Rejected {
                status: 422,
                message: format!("invalid size {}", request.size),
            });
        }
        if let Some(network) = &request.private_network_uuid
            && !state.networks.contains(network)
        {
            return Err(ApiError::Rejected {
                status: 422,
                message: format!("private network {} does not exist", network),
            });
        }

        let uuid = Uuid::new_v4().to_string();
        let short = uuid.split('-').next().unwrap_or("0");
        let password = generate_password();
        let host = format!("{}-{}.db.example.com", request.name, short);
        let private_host = format!("private-{}", host);

        let mut tags = request.tags.clone();
        tags.sort();
        tags.dedup();

        let record = RemoteReplicaRecord {
            id: uuid.clone(),
            name: request.name.clone(),
            region: request.region.clone(),
            size: request.size.clone(),
            status: ReplicaStatus::Creating,
            tags: (!tags.is_empty()).then_some(tags),
            private_network_uuid: request
                .private_network_uuid
                .clone()
                .or_else(|| state.default_network.clone()),
            created_at: Some(Utc::now()),
            connection: Some(connection(host, &password)),
            private_connection: Some(connection(private_host, &password)),
        };

        let settles_to = if std::mem::take(&mut state.fail_next_provisioning) {
            ReplicaStatus::Failed
        } else {
            ReplicaStatus::Online
        };
        let pending_polls = state.provisioning_polls;
        state.replicas.insert(
            id.clone(),
            SimulatedReplica {
                record: record.clone(),
                pending_polls,
                settles_to,
                deleting: None,
            },
        );
        debug!(replica = %id, "simulated replica created");

        Ok(record)
    }

    async fn get_replica(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> Result<RemoteReplicaRecord, ApiError> {
        let mut state = self.state.lock().await;
        let id = ReplicaId::new(cluster_id, name);
        state.calls.push(ApiCall::Get(id.clone()));

        if let Some(err) = state.get_errors.pop_front() {
            return Err(err);
        }
        if !state.clusters.contains(cluster_id) {
            return Err(ApiError::NotFound(format!("cluster {}", cluster_id)));
        }

        let echo_secrets = state.echo_secrets;
        let replica = state
            .replicas
            .get_mut(&id)
            .ok_or_else(|| ApiError::NotFound(format!("replica {}", id)))?;

        if let Some(remaining) = replica.deleting {
            if remaining == 0 {
                state.replicas.remove(&id);
                return Err(ApiError::NotFound(format!("replica {}", id)));
            }
            replica.deleting = Some(remaining - 1);
        } else if replica.pending_polls > 0 {
            replica.pending_polls -= 1;
        } else {
            replica.record.status = replica.settles_to;
        }

        let record = replica.record.clone();
        Ok(if echo_secrets {
            record
        } else {
            strip_secrets(record)
        })
    }

    async fn update_replica(
        &self,
        cluster_id: &str,
        name: &str,
        request: &ReplicaUpdateRequest,
    ) -> Result<RemoteReplicaRecord, ApiError> {
        let mut state = self.state.lock().await;
        let id = ReplicaId::new(cluster_id, name);
        state.calls.push(ApiCall::Update(id.clone(), request.clone()));

        if let Some(size) = &request.size
            && !is_known_size(size)
        {
            return Err(ApiError::Rejected {
                status: 422,
                message: format!("invalid size {}", size),
            });
        }

        let provisioning_polls = state.provisioning_polls;
        let replica = state
            .replicas
            .get_mut(&id)
            .ok_or_else(|| ApiError::NotFound(format!("replica {}", id)))?;

        if let Some(size) = &request.size {
            replica.record.size = size.clone();
            replica.record.status = ReplicaStatus::Resizing;
            replica.pending_polls = provisioning_polls;
            replica.settles_to = ReplicaStatus::Online;
        }
        if let Some(tags) = &request.tags {
            let mut tags = tags.clone();
            tags.sort();
            tags.dedup();
            replica.record.tags = (!tags.is_empty()).then_some(tags);
        }

        Ok(strip_secrets(replica.record.clone()))
    }

    async fn delete_replica(&self, cluster_id: &str, name: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        let id = ReplicaId::new(cluster_id, name);
        state.calls.push(ApiCall::Delete(id.clone()));

        if let Some(err) = state.delete_errors.pop_front() {
            return Err(err);
        }

        let deletion_polls = state.deletion_polls;
        let Some(replica) = state.replicas.get_mut(&id) else {
            return Err(ApiError::NotFound(format!("replica {}", id)));
        };
        if replica.deleting.is_none() {
            if deletion_polls == 0 {
                state.replicas.remove(&id);
            } else {
                replica.deleting = Some(deletion_polls);
            }
        }
        Ok(())
    }

    async fn list_replicas(&self, cluster_id: &str) -> Result<Vec<RemoteReplicaRecord>, ApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(ApiCall::List(cluster_id.to_string()));

        if !state.clusters.contains(cluster_id) {
            return Err(ApiError::NotFound(format!("cluster {}", cluster_id)));
        }

        let mut records: Vec<_> = state
            .replicas
            .iter()
            .filter(|(id, _)| id.cluster_id == cluster_id)
            .map(|(_, replica)| strip_secrets(replica.record.clone()))
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}
