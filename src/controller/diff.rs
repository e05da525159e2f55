//! Diff engine: decides which remote calls a desired-vs-previous transition needs
//!
//! Attributes are compared in schema order. The first differing immutable
//! attribute turns the whole plan into a single replacement and stops the
//! walk; differing mutable attributes accumulate into one update payload.
//! Computed attributes are never compared against desired configuration,
//! and neither are remote-defaulted attributes the configuration leaves out.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::client::ReplicaUpdateRequest;
use crate::controller::schema::{Attribute, REPLICA_SCHEMA, configurable_attributes};
use crate::model::{DesiredConfig, ObservedState};

static ABSENT: AttributeValue = AttributeValue::Absent;

/// Value of a single attribute as seen by the diff engine
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum AttributeValue {
    Absent,
    Text(String),
    Set(BTreeSet<String>),
}

impl AttributeValue {
    fn optional(value: Option<&String>) -> Self {
        match value {
            Some(v) => AttributeValue::Text(v.clone()),
            None => AttributeValue::Absent,
        }
    }

    /// An empty set and an absent value are the same thing
    pub fn normalized(&self) -> &Self {
        match self {
            AttributeValue::Set(set) if set.is_empty() => &ABSENT,
            AttributeValue::Text(text) if text.is_empty() => &ABSENT,
            other => other,
        }
    }

    pub fn equivalent(&self, other: &AttributeValue) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Absent => write!(f, "<absent>"),
            AttributeValue::Text(text) => write!(f, "{:?}", text),
            AttributeValue::Set(set) => {
                let items: Vec<_> = set.iter().map(|s| format!("{:?}", s)).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

/// What a single attribute change requires
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    None,
    Update,
    Replace,
}

/// What the whole plan requires
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    /// Nothing exists yet
    Create,
    /// Previous state already matches
    NoOp,
    /// Mutable attributes changed; apply in place
    Update,
    /// An immutable attribute changed; destroy then recreate
    Replace,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    pub attribute: Attribute,
    pub old: AttributeValue,
    pub new: AttributeValue,
    pub action: ChangeAction,
}

/// Ordered attribute comparisons for one reconciliation pass
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChangePlan {
    pub action: PlanAction,
    pub changes: Vec<AttributeChange>,
}

impl ChangePlan {
    fn create() -> Self {
        Self {
            action: PlanAction::Create,
            changes: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.action == PlanAction::NoOp
    }

    pub fn requires_replacement(&self) -> bool {
        self.action == PlanAction::Replace
    }

    /// Entries whose values differ
    pub fn changed(&self) -> impl Iterator<Item = &AttributeChange> {
        self.changes
            .iter()
            .filter(|change| change.action != ChangeAction::None)
    }

    pub fn changed_attributes(&self) -> Vec<Attribute> {
        self.changed().map(|change| change.attribute).collect()
    }

    /// Payload for the in-place update call, carrying only changed attributes
    pub fn update_request(&self) -> ReplicaUpdateRequest {
        let mut request = ReplicaUpdateRequest::default();
        for change in self.changed() {
            if change.action != ChangeAction::Update {
                continue;
            }
            match (change.attribute, &change.new) {
                (Attribute::Size, AttributeValue::Text(size)) => request.size = Some(size.clone()),
                (Attribute::Tags, AttributeValue::Set(tags)) => {
                    request.tags = Some(tags.iter().cloned().collect())
                }
                (Attribute::Tags, AttributeValue::Absent) => request.tags = Some(Vec::new()),
                _ => {}
            }
        }
        request
    }
}

/// Value of a configurable attribute in desired configuration
pub fn desired_value(attribute: Attribute, config: &DesiredConfig) -> AttributeValue {
    match attribute {
        Attribute::ClusterId => AttributeValue::Text(config.cluster_id.clone()),
        Attribute::Name => AttributeValue::Text(config.name.clone()),
        Attribute::Region => AttributeValue::Text(config.region.clone()),
        Attribute::Size => AttributeValue::Text(config.size.clone()),
        Attribute::Tags => AttributeValue::Set(config.tags.clone()),
        Attribute::PrivateNetworkUuid => {
            AttributeValue::optional(config.private_network_uuid.as_ref())
        }
        // Desired configuration has no opinion on computed attributes
        _ => AttributeValue::Absent,
    }
}

/// Value of any attribute in observed state; secrets are masked
pub fn observed_value(attribute: Attribute, state: &ObservedState) -> AttributeValue {
    let text = |value: &str| AttributeValue::Text(value.to_string());
    let secret = |empty: bool| {
        if empty {
            AttributeValue::Absent
        } else {
            AttributeValue::Text("<sensitive>".to_string())
        }
    };

    match attribute {
        Attribute::ClusterId => text(&state.cluster_id),
        Attribute::Name => text(&state.name),
        Attribute::Region => text(&state.region),
        Attribute::Size => text(&state.size),
        Attribute::Tags => AttributeValue::Set(state.tags.clone()),
        Attribute::PrivateNetworkUuid => {
            AttributeValue::optional(state.private_network_uuid.as_ref())
        }
        Attribute::Id => text(&state.id),
        Attribute::Host => text(&state.host),
        Attribute::PrivateHost => text(&state.private_host),
        Attribute::Port => AttributeValue::Text(state.port.to_string()),
        Attribute::User => text(&state.user),
        Attribute::Password => secret(state.password.is_empty()),
        Attribute::Database => text(&state.database),
        Attribute::Uri => secret(state.uri.is_empty()),
        Attribute::PrivateUri => secret(state.private_uri.is_empty()),
        Attribute::Status => text(state.status.as_str()),
        Attribute::CreatedAt => state
            .created_at
            .map(|ts| AttributeValue::Text(ts.to_rfc3339()))
            .unwrap_or(AttributeValue::Absent),
    }
}

/// Compute the change plan from previous state to desired configuration
pub fn plan(previous: Option<&ObservedState>, desired: &DesiredConfig) -> ChangePlan {
    let Some(previous) = previous else {
        return ChangePlan::create();
    };

    let mut changes = Vec::new();
    let mut action = PlanAction::NoOp;

    for spec in REPLICA_SCHEMA {
        if spec.mutability.is_computed() {
            continue;
        }

        let old = observed_value(spec.attribute, previous);
        let new = desired_value(spec.attribute, desired);
        let no_opinion =
            spec.mutability.is_remote_defaulted() && new.normalized() == &AttributeValue::Absent;

        if no_opinion || old.equivalent(&new) {
            changes.push(AttributeChange {
                attribute: spec.attribute,
                old,
                new,
                action: ChangeAction::None,
            });
            continue;
        }

        if spec.mutability.forces_replacement() {
            changes.push(AttributeChange {
                attribute: spec.attribute,
                old,
                new,
                action: ChangeAction::Replace,
            });
            action = PlanAction::Replace;
            break;
        }

        changes.push(AttributeChange {
            attribute: spec.attribute,
            old,
            new,
            action: ChangeAction::Update,
        });
        action = PlanAction::Update;
    }

    ChangePlan { action, changes }
}

/// Compare persisted state with a fresh remote read over configurable attributes
///
/// Each entry carries the action that would bring the remote back in line
/// with the persisted configuration.
pub fn detect_drift(persisted: &ObservedState, live: &ObservedState) -> Vec<AttributeChange> {
    configurable_attributes()
        .filter_map(|spec| {
            let old = observed_value(spec.attribute, persisted);
            let new = observed_value(spec.attribute, live);
            if old.equivalent(&new) {
                return None;
            }
            let action = if spec.mutability.forces_replacement() {
                ChangeAction::Replace
            } else {
                ChangeAction::Update
            };
            Some(AttributeChange {
                attribute: spec.attribute,
                old,
                new,
                action,
            })
        })
        .collect()
}
