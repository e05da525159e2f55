//! Attribute schema for the replica resource
//!
//! Every attribute is declared once with its mutability class. The diff
//! engine walks this table in order, so immutable attributes come first.
//!
//! Validation rules:
//! - cluster_id: non-empty, no whitespace or `/`
//! - name: 1-63 chars, lowercase letters, digits and hyphens, starts with a letter
//! - region: lowercase letters followed by digits (e.g., "nyc3")
//! - size: lowercase slug ending in `gb` with a `<n>vcpu` segment (e.g., "db-s-2vcpu-4gb")
//! - tags: 1-255 chars of letters, digits, `:`, `-`, `_`
//! - private_network_uuid: a UUID; the remote assigns its default VPC when omitted

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::controller::error::{Error, Result};
use crate::model::DesiredConfig;

pub const MAX_NAME_LENGTH: usize = 63;
pub const MAX_TAG_LENGTH: usize = 255;

/// How an attribute may change over the lifetime of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    RequiredImmutable,
    RequiredMutable,
    OptionalImmutable,
    /// Optional; the remote assigns a value when it is not declared
    OptionalComputedImmutable,
    OptionalMutable,
    /// Set by the remote side only; never compared against desired config
    Computed,
}

impl Mutability {
    pub fn forces_replacement(&self) -> bool {
        matches!(
            self,
            Mutability::RequiredImmutable
                | Mutability::OptionalImmutable
                | Mutability::OptionalComputedImmutable
        )
    }

    /// Leaving the attribute undeclared accepts whatever the remote assigned
    pub fn is_remote_defaulted(&self) -> bool {
        matches!(self, Mutability::OptionalComputedImmutable)
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Mutability::Computed)
    }

    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Mutability::RequiredImmutable | Mutability::RequiredMutable
        )
    }
}

/// Attributes of the replica resource
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    ClusterId,
    Name,
    Region,
    PrivateNetworkUuid,
    Size,
    Tags,
    Id,
    Host,
    PrivateHost,
    Port,
    User,
    Password,
    Database,
    Uri,
    PrivateUri,
    Status,
    CreatedAt,
}

impl Attribute {
    /// Key used in declarative configuration and persisted state
    pub fn key(&self) -> &'static str {
        match self {
            Attribute::ClusterId => "cluster_id",
            Attribute::Name => "name",
            Attribute::Region => "region",
            Attribute::PrivateNetworkUuid => "private_network_uuid",
            Attribute::Size => "size",
            Attribute::Tags => "tags",
            Attribute::Id => "id",
            Attribute::Host => "host",
            Attribute::PrivateHost => "private_host",
            Attribute::Port => "port",
            Attribute::User => "user",
            Attribute::Password => "password",
            Attribute::Database => "database",
            Attribute::Uri => "uri",
            Attribute::PrivateUri => "private_uri",
            Attribute::Status => "status",
            Attribute::CreatedAt => "created_at",
        }
    }

    pub const fn mutability(&self) -> Mutability {
        match self {
            Attribute::ClusterId | Attribute::Name | Attribute::Region => {
                Mutability::RequiredImmutable
            }
            Attribute::PrivateNetworkUuid => Mutability::OptionalComputedImmutable,
            Attribute::Size => Mutability::RequiredMutable,
            Attribute::Tags => Mutability::OptionalMutable,
            _ => Mutability::Computed,
        }
    }

    pub const fn is_sensitive(&self) -> bool {
        matches!(
            self,
            Attribute::Password | Attribute::Uri | Attribute::PrivateUri
        )
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Declaration of one attribute
#[derive(Debug, Clone, Copy)]
pub struct AttributeSpec {
    pub attribute: Attribute,
    pub mutability: Mutability,
    pub sensitive: bool,
}

const fn attr(attribute: Attribute) -> AttributeSpec {
    AttributeSpec {
        attribute,
        mutability: attribute.mutability(),
        sensitive: attribute.is_sensitive(),
    }
}

/// The replica schema, immutable attributes first
pub static REPLICA_SCHEMA: &[AttributeSpec] = &[
    attr(Attribute::ClusterId),
    attr(Attribute::Name),
    attr(Attribute::Region),
    attr(Attribute::PrivateNetworkUuid),
    attr(Attribute::Size),
    attr(Attribute::Tags),
    attr(Attribute::Id),
    attr(Attribute::Host),
    attr(Attribute::PrivateHost),
    attr(Attribute::Port),
    attr(Attribute::User),
    attr(Attribute::Password),
    attr(Attribute::Database),
    attr(Attribute::Uri),
    attr(Attribute::PrivateUri),
    attr(Attribute::Status),
    attr(Attribute::CreatedAt),
];

/// Attributes the operator can declare
pub fn configurable_attributes() -> impl Iterator<Item = &'static AttributeSpec> {
    REPLICA_SCHEMA
        .iter()
        .filter(|spec| !spec.mutability.is_computed())
}

/// Validate a desired configuration before any remote call is made
pub fn validate_config(config: &DesiredConfig) -> Result<()> {
    validate_cluster_id(&config.cluster_id)?;
    validate_name(&config.name)?;
    validate_region(&config.region)?;
    validate_size(&config.size)?;
    for tag in &config.tags {
        validate_tag(tag)?;
    }
    if let Some(network) = &config.private_network_uuid {
        validate_private_network(network)?;
    }
    Ok(())
}

fn validate_cluster_id(cluster_id: &str) -> Result<()> {
    if cluster_id.is_empty() {
        return Err(Error::ValidationError("cluster_id is required".to_string()));
    }
    if cluster_id
        .chars()
        .any(|c| c.is_whitespace() || c == '/')
    {
        return Err(Error::ValidationError(format!(
            "cluster_id contains invalid characters: {:?}",
            cluster_id
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(Error::ValidationError(format!(
            "name must be between 1 and {} characters: {:?}",
            MAX_NAME_LENGTH, name
        )));
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(Error::ValidationError(format!(
            "name must start with a lowercase letter: {}",
            name
        )));
    }
    if name.ends_with('-') {
        return Err(Error::ValidationError(format!(
            "name must not end with a hyphen: {}",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::ValidationError(format!(
            "name may only contain lowercase letters, digits and hyphens: {}",
            name
        )));
    }
    Ok(())
}

fn validate_region(region: &str) -> Result<()> {
    let letters = region
        .chars()
        .take_while(|c| c.is_ascii_lowercase())
        .count();
    let digits = &region[letters..];

    if letters == 0 || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::ValidationError(format!(
            "region must be a region slug such as nyc3: {:?}",
            region
        )));
    }
    Ok(())
}

fn validate_size(size: &str) -> Result<()> {
    let well_formed = !size.is_empty()
        && size
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && size.ends_with("gb")
        && size.split('-').any(|segment| {
            segment
                .strip_suffix("vcpu")
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        });

    if !well_formed {
        return Err(Error::ValidationError(format!(
            "size must be a size slug such as db-s-2vcpu-4gb: {:?}",
            size
        )));
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() || tag.len() > MAX_TAG_LENGTH {
        return Err(Error::ValidationError(format!(
            "tags must be between 1 and {} characters: {:?}",
            MAX_TAG_LENGTH, tag
        )));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_'))
    {
        return Err(Error::ValidationError(format!(
            "tag may only contain letters, digits, ':', '-' and '_': {}",
            tag
        )));
    }
    Ok(())
}

fn validate_private_network(network: &str) -> Result<()> {
    Uuid::parse_str(network).map_err(|_| {
        Error::ValidationError(format!(
            "private_network_uuid must be a UUID: {:?}",
            network
        ))
    })?;
    Ok(())
}
