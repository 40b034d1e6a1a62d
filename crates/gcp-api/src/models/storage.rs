//! Cloud Storage models.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::Paginated;

/// A bucket resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Bucket name.
    pub name: String,
    /// Location, e.g. `US-EAST1`.
    #[serde(default)]
    pub location: Option<String>,
    /// Creation time.
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
    /// Every other field of the resource.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An object resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    /// Full object name.
    pub name: String,
    /// Content length in bytes.
    #[serde(default, deserialize_with = "super::int64::deserialize")]
    pub size: Option<u64>,
    /// Last update time.
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    /// Creation time.
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
    /// Content type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Every other field of the resource.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of `buckets.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBucketsResponse {
    /// Buckets on this page.
    #[serde(default)]
    pub items: Vec<Bucket>,
    /// Token of the next page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl Paginated for ListBucketsResponse {
    type Item = Bucket;

    fn items(self) -> Vec<Bucket> {
        self.items
    }

    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }
}

/// Response of `objects.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsResponse {
    /// Objects on this page.
    #[serde(default)]
    pub items: Vec<Object>,
    /// Prefixes folded by the delimiter.
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// Token of the next page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl Paginated for ListObjectsResponse {
    type Item = Object;

    fn items(self) -> Vec<Object> {
        self.items
    }

    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }
}

impl ListObjectsResponse {
    /// Fold the contents of a later page into this one.
    pub(crate) fn absorb(&mut self, page: Self) {
        self.items.extend(page.items);
        self.prefixes.extend(page.prefixes);
        self.next_page_token = page.next_page_token;
    }
}
