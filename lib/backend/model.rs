//! Domain values returned by [`CloudBackend`](super::CloudBackend) collaborators.
//!
//! Every model carries the handful of fields the filesystem needs to interpret, plus a flattened
//! `extra` map holding whatever else the backend reported. The `extra` map is what makes the
//! `.meta` descriptors useful: they show the whole resource, not just the fields we parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A storage bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Globally unique bucket name.
    pub name: String,
    /// Bucket location, e.g. `US-EAST1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<DateTime<Utc>>,
    /// Remaining descriptor fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Attributes of a single object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectAttributes {
    /// Full object name, including any prefix.
    pub name: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last metadata or content update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<DateTime<Utc>>,
    /// Content type, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Remaining descriptor fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A shallow listing of one prefix level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectListing {
    /// Objects directly under the listed prefix.
    pub objects: Vec<ObjectAttributes>,
    /// Sub-prefixes directly under the listed prefix, each ending in the delimiter.
    pub prefixes: Vec<String>,
}

impl ObjectListing {
    /// Whether the listing contains nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.prefixes.is_empty()
    }
}

/// A tabular-catalog dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    /// Dataset id, unique within its project.
    pub dataset_id: String,
    /// Dataset location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Remaining descriptor fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A table reference as returned by a table listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    /// Table id, unique within its dataset.
    pub table_id: String,
    /// Remaining descriptor fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The full description of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescription {
    /// Table id.
    pub table_id: String,
    /// Number of rows, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_rows: Option<u64>,
    /// Logical size in bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_bytes: Option<u64>,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// The table schema, exactly as reported.
    #[serde(default)]
    pub schema: Value,
    /// Remaining descriptor fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A service account in the identity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    /// Account email, its unique name within a project.
    pub email: String,
    /// Human readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Remaining descriptor fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A key belonging to a service account. Never contains private key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountKey {
    /// Full resource name of the key.
    pub name: String,
    /// Key type, e.g. `USER_MANAGED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    /// Remaining descriptor fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An access policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Role bindings.
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Concurrency tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Remaining descriptor fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One role granted to a set of members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Role name, e.g. `roles/storage.objectViewer`.
    pub role: String,
    /// Grantees, e.g. `user:alice@example.com`.
    #[serde(default)]
    pub members: Vec<String>,
    /// Optional condition, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}
