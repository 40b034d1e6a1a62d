//! BigQuery models.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::Paginated;
use super::iam::{Binding, Policy};

/// Fully qualified dataset name.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReference {
    /// Owning project.
    pub project_id: String,
    /// Dataset id.
    pub dataset_id: String,
}

/// A dataset as it appears in `datasets.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetListEntry {
    /// The dataset's name.
    pub dataset_reference: DatasetReference,
    /// Location.
    #[serde(default)]
    pub location: Option<String>,
    /// Every other field of the entry.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of `datasets.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDatasetsResponse {
    /// Datasets on this page. Absent when the project has none.
    #[serde(default)]
    pub datasets: Vec<DatasetListEntry>,
    /// Token of the next page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl Paginated for ListDatasetsResponse {
    type Item = DatasetListEntry;

    fn items(self) -> Vec<DatasetListEntry> {
        self.datasets
    }

    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }
}

/// One grant of a dataset's legacy access list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    /// `OWNER`, `WRITER`, `READER` or a full IAM role.
    #[serde(default)]
    pub role: Option<String>,
    /// A user grantee.
    #[serde(default)]
    pub user_by_email: Option<String>,
    /// A group grantee.
    #[serde(default)]
    pub group_by_email: Option<String>,
    /// A domain grantee.
    #[serde(default)]
    pub domain: Option<String>,
    /// A special group grantee, e.g. `projectReaders`.
    #[serde(default)]
    pub special_group: Option<String>,
    /// A grantee in IAM member syntax.
    #[serde(default)]
    pub iam_member: Option<String>,
    /// Authorized views, routines and datasets.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccessEntry {
    /// The grantee in IAM member syntax, if this entry grants to a principal.
    #[must_use]
    pub fn member(&self) -> Option<String> {
        if let Some(member) = &self.iam_member {
            return Some(member.clone());
        }
        let (kind, value) = if let Some(v) = &self.user_by_email {
            ("user", v)
        } else if let Some(v) = &self.group_by_email {
            ("group", v)
        } else if let Some(v) = &self.domain {
            ("domain", v)
        } else if let Some(v) = &self.special_group {
            ("specialGroup", v)
        } else {
            return None;
        };
        Some(format!("{kind}:{value}"))
    }

    /// The granted role in IAM syntax.
    #[must_use]
    pub fn iam_role(&self) -> Option<String> {
        let role = self.role.as_deref()?;
        Some(
            match role {
                "OWNER" => "roles/bigquery.dataOwner",
                "WRITER" => "roles/bigquery.dataEditor",
                "READER" => "roles/bigquery.dataViewer",
                other => other,
            }
            .to_owned(),
        )
    }
}

/// A dataset resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    /// The dataset's name.
    pub dataset_reference: DatasetReference,
    /// Location.
    #[serde(default)]
    pub location: Option<String>,
    /// Legacy access list.
    #[serde(default)]
    pub access: Vec<AccessEntry>,
    /// Concurrency tag.
    #[serde(default)]
    pub etag: Option<String>,
    /// Every other field of the resource.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dataset {
    /// The access list as an IAM policy, one binding per role.
    ///
    /// Entries without a role or without a principal (authorized views and the like) are skipped.
    #[must_use]
    pub fn policy(&self) -> Policy {
        let mut bindings: Vec<Binding> = Vec::new();
        for entry in &self.access {
            let (Some(role), Some(member)) = (entry.iam_role(), entry.member()) else {
                continue;
            };
            match bindings.iter_mut().find(|b| b.role == role) {
                Some(binding) => binding.members.push(member),
                None => bindings.push(Binding {
                    role,
                    members: vec![member],
                    condition: None,
                }),
            }
        }
        Policy {
            bindings,
            etag: self.etag.clone(),
            version: None,
            extra: Map::new(),
        }
    }
}

/// Fully qualified table name.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    /// Owning project.
    pub project_id: String,
    /// Owning dataset.
    pub dataset_id: String,
    /// Table id.
    pub table_id: String,
}

/// A table as it appears in `tables.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableListEntry {
    /// The table's name.
    pub table_reference: TableReference,
    /// Every other field of the entry.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of `tables.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTablesResponse {
    /// Tables on this page. Absent when the dataset has none.
    #[serde(default)]
    pub tables: Vec<TableListEntry>,
    /// Token of the next page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl Paginated for ListTablesResponse {
    type Item = TableListEntry;

    fn items(self) -> Vec<TableListEntry> {
        self.tables
    }

    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }
}

/// A table resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    /// The table's name.
    pub table_reference: TableReference,
    /// Row count.
    #[serde(default, deserialize_with = "super::int64::deserialize")]
    pub num_rows: Option<u64>,
    /// Logical size in bytes.
    #[serde(default, deserialize_with = "super::int64::deserialize")]
    pub num_bytes: Option<u64>,
    /// Last modification, in milliseconds since the epoch.
    #[serde(default, deserialize_with = "super::int64::deserialize")]
    pub last_modified_time: Option<u64>,
    /// Schema, kept verbatim.
    #[serde(default)]
    pub schema: Option<Value>,
    /// Every other field of the resource.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_counts_arrive_as_strings() {
        let table: Table = serde_json::from_str(
            r#"{"tableReference":{"projectId":"p","datasetId":"d","tableId":"t"},
                "numRows":"42","lastModifiedTime":"1700000000000","type":"TABLE"}"#,
        )
        .expect("table decodes");
        assert_eq!(table.num_rows, Some(42));
        assert_eq!(table.num_bytes, None);
        assert_eq!(table.last_modified_time, Some(1_700_000_000_000));
        assert_eq!(table.extra["type"], "TABLE");
    }

    #[test]
    fn access_list_becomes_bindings() {
        let dataset: Dataset = serde_json::from_str(
            r#"{"datasetReference":{"projectId":"p","datasetId":"d"},
                "access":[
                  {"role":"OWNER","userByEmail":"a@x.com"},
                  {"role":"READER","specialGroup":"projectReaders"},
                  {"role":"OWNER","groupByEmail":"g@x.com"},
                  {"view":{"projectId":"p","datasetId":"d2","tableId":"v"}}
                ]}"#,
        )
        .expect("dataset decodes");
        let policy = dataset.policy();
        assert_eq!(policy.bindings.len(), 2);
        assert_eq!(policy.bindings[0].role, "roles/bigquery.dataOwner");
        assert_eq!(
            policy.bindings[0].members,
            vec!["user:a@x.com".to_owned(), "group:g@x.com".to_owned()]
        );
        assert_eq!(
            policy.bindings[1].members,
            vec!["specialGroup:projectReaders".to_owned()]
        );
    }
}
