use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;
use crate::etag::ETag;
use crate::key::EntityKey;

/// Lineage identifier assigned once when an entity is first created.
///
/// Generated as a UUID v7 so guids sort by creation time. A key that is
/// deleted and created again receives a new guid.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Generate a new time-ordered guid (UUID v7).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Wrap an existing identifier (e.g. read back from storage).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if no guid has been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of write that produced a revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Created,
    Updated,
    Deleted,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            other => Err(TypeError::UnknownAction(other.to_string())),
        }
    }
}

/// Where an entity was imported or synchronized from.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityOriginInfo {
    /// Name of the external system (e.g. a provisioning file source).
    pub source: String,
    /// Identifier of the entity within that system.
    pub key: String,
    /// Last modification time reported by the source, in milliseconds.
    pub time: i64,
}

/// A non-fatal problem attached to an accepted write.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityErrorInfo {
    pub code: i64,
    pub message: String,
    /// Optional structured detail, as a JSON document.
    #[serde(with = "crate::document")]
    pub details_json: Vec<u8>,
}

/// A stored, versioned resource addressed by a hierarchical key.
///
/// Request payloads and stored rows share this type. Server-assigned fields
/// (`guid`, `resource_version`, `etag`, `size`, `fields`, the provenance
/// timestamps and `action`) are ignored on input and populated on output.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Entity {
    pub guid: Guid,
    pub resource_version: u64,

    pub key: String,
    pub group: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    pub subresource: String,
    pub group_version: String,

    pub origin: Option<EntityOriginInfo>,
    pub folder: String,

    #[serde(with = "crate::document")]
    pub meta: Vec<u8>,
    #[serde(with = "crate::document")]
    pub body: Vec<u8>,
    #[serde(with = "crate::document")]
    pub status: Vec<u8>,

    pub title: String,
    pub description: String,
    pub slug: String,
    pub message: String,
    pub labels: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
    pub errors: Vec<EntityErrorInfo>,

    pub size: u64,
    pub etag: ETag,

    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,

    pub action: Action,
}

impl Entity {
    /// A request skeleton carrying only a key and creator.
    pub fn new(key: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            created_by: created_by.into(),
            ..Default::default()
        }
    }

    /// Copy the components of a parsed key into the identity fields.
    pub fn set_key_components(&mut self, key: &EntityKey) {
        self.group = key.group.clone();
        self.resource = key.resource.clone();
        self.namespace = key.namespace.clone();
        self.name = key.name.clone();
        self.subresource = key.subresource.clone().unwrap_or_default();
    }

    /// Returns `true` if this revision records a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.action == Action::Deleted
    }
}

/// Derive the read-only `fields` projection from a body document.
///
/// Top-level scalar members of a JSON object body (strings, numbers and
/// booleans) are rendered as strings. Any other body yields no fields.
pub fn derive_fields(body: &[u8]) -> BTreeMap<String, String> {
    let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) else {
        return BTreeMap::new();
    };
    map.into_iter()
        .filter_map(|(name, value)| match value {
            Value::String(s) => Some((name, s)),
            Value::Number(n) => Some((name, n.to_string())),
            Value::Bool(b) => Some((name, b.to_string())),
            _ => None,
        })
        .collect()
}
