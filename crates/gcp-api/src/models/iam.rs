//! IAM models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Paginated;

/// A service account resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    /// Account email.
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Every other field of the resource.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of `serviceAccounts.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListServiceAccountsResponse {
    /// Accounts on this page.
    #[serde(default)]
    pub accounts: Vec<ServiceAccount>,
    /// Token of the next page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl Paginated for ListServiceAccountsResponse {
    type Item = ServiceAccount;

    fn items(self) -> Vec<ServiceAccount> {
        self.accounts
    }

    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }
}

/// Public metadata of a service account key.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountKey {
    /// Full resource name of the key.
    pub name: String,
    /// `USER_MANAGED` or `SYSTEM_MANAGED`.
    #[serde(default)]
    pub key_type: Option<String>,
    /// Every other field of the resource.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of `serviceAccounts.keys.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListServiceAccountKeysResponse {
    /// Every key of the account.
    #[serde(default)]
    pub keys: Vec<ServiceAccountKey>,
}

/// An IAM policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Role bindings.
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Concurrency tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Policy schema version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Every other field of the resource.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One role granted to a set of members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    /// Role name.
    pub role: String,
    /// Grantees.
    #[serde(default)]
    pub members: Vec<String>,
    /// Condition, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}
