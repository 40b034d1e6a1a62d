//! [`CloudBackend`] over the REST SDK.

use bytes::Bytes;
use chrono::DateTime;
use gcp_api::models as api;
use gcp_api::{Gcp, GcpError};
use serde_json::{Map, Value, json};

use gcloud_fs::backend::{
    BackendError, Binding, Bucket, CloudBackend, Dataset, ObjectAttributes, ObjectListing, Policy,
    ServiceAccount, ServiceAccountKey, TableDescription, TableRef,
};

/// Serves filesystem reads from the Cloud Storage, BigQuery and IAM APIs.
pub struct GcpBackend {
    client: Gcp,
}

impl GcpBackend {
    pub fn new(client: Gcp) -> Self {
        Self { client }
    }
}

fn map_err(resource: &str) -> impl FnOnce(GcpError) -> BackendError + '_ {
    move |err| match err {
        e if e.is_not_found() => BackendError::NotFound(resource.to_owned()),
        GcpError::Api {
            status, message, ..
        } => BackendError::Status {
            status: status.as_u16(),
            message,
        },
        e @ GcpError::InvalidToken => BackendError::Status {
            status: 401,
            message: e.to_string(),
        },
        GcpError::Decode(e) => BackendError::Malformed(e.to_string()),
        e @ (GcpError::Http(_) | GcpError::Url(_)) => BackendError::Transport(e.to_string()),
    }
}

fn bucket(b: api::Bucket) -> Bucket {
    Bucket {
        name: b.name,
        location: b.location,
        time_created: b.time_created,
        extra: b.extra,
    }
}

fn object(o: api::Object) -> ObjectAttributes {
    ObjectAttributes {
        name: o.name,
        size: o.size.unwrap_or(0),
        updated: o.updated,
        time_created: o.time_created,
        content_type: o.content_type,
        extra: o.extra,
    }
}

fn policy(p: api::Policy) -> Policy {
    let mut extra = p.extra;
    if let Some(version) = p.version {
        extra.insert("version".to_owned(), Value::from(version));
    }
    Policy {
        bindings: p
            .bindings
            .into_iter()
            .map(|b| Binding {
                role: b.role,
                members: b.members,
                condition: b.condition,
            })
            .collect(),
        etag: p.etag,
        extra,
    }
}

fn table(t: api::Table) -> TableDescription {
    let mut extra: Map<String, Value> = t.extra;
    let reference = &t.table_reference;
    extra.insert(
        "tableReference".to_owned(),
        json!({
            "projectId": reference.project_id,
            "datasetId": reference.dataset_id,
            "tableId": reference.table_id,
        }),
    );
    TableDescription {
        table_id: t.table_reference.table_id,
        num_rows: t.num_rows,
        num_bytes: t.num_bytes,
        last_modified: t
            .last_modified_time
            .and_then(|ms| i64::try_from(ms).ok())
            .and_then(DateTime::from_timestamp_millis),
        schema: t.schema.unwrap_or(Value::Null),
        extra,
    }
}

impl CloudBackend for GcpBackend {
    async fn list_buckets(&self, project: &str) -> Result<Vec<Bucket>, BackendError> {
        let buckets = self
            .client
            .storage()
            .list_buckets(project)
            .collect()
            .await
            .map_err(map_err(project))?;
        Ok(buckets.into_iter().map(bucket).collect())
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket, BackendError> {
        let found = self
            .client
            .storage()
            .get_bucket(name)
            .await
            .map_err(map_err(name))?;
        Ok(bucket(found))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<ObjectListing, BackendError> {
        let listing = self
            .client
            .storage()
            .list_objects(bucket, prefix, delimiter)
            .await
            .map_err(map_err(bucket))?;
        Ok(ObjectListing {
            objects: listing.items.into_iter().map(object).collect(),
            prefixes: listing.prefixes,
        })
    }

    async fn get_object_attributes(
        &self,
        bucket: &str,
        name: &str,
    ) -> Result<ObjectAttributes, BackendError> {
        let found = self
            .client
            .storage()
            .get_object(bucket, name)
            .await
            .map_err(map_err(name))?;
        Ok(object(found))
    }

    async fn read_object_range(
        &self,
        bucket: &str,
        name: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, BackendError> {
        self.client
            .storage()
            .read_range(bucket, name, offset, len)
            .await
            .map_err(map_err(name))
    }

    async fn list_datasets(&self, project: &str) -> Result<Vec<Dataset>, BackendError> {
        let entries = self
            .client
            .bigquery(project)
            .list_datasets()
            .collect()
            .await
            .map_err(map_err(project))?;
        Ok(entries
            .into_iter()
            .map(|d| Dataset {
                dataset_id: d.dataset_reference.dataset_id,
                location: d.location,
                extra: d.extra,
            })
            .collect())
    }

    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<TableRef>, BackendError> {
        let entries = self
            .client
            .bigquery(project)
            .list_tables(dataset)
            .collect()
            .await
            .map_err(map_err(dataset))?;
        Ok(entries
            .into_iter()
            .map(|t| TableRef {
                table_id: t.table_reference.table_id,
                extra: t.extra,
            })
            .collect())
    }

    async fn describe_table(
        &self,
        project: &str,
        dataset: &str,
        name: &str,
    ) -> Result<TableDescription, BackendError> {
        let found = self
            .client
            .bigquery(project)
            .get_table(dataset, name)
            .await
            .map_err(map_err(name))?;
        Ok(table(found))
    }

    async fn list_service_accounts(
        &self,
        project: &str,
    ) -> Result<Vec<ServiceAccount>, BackendError> {
        let accounts = self
            .client
            .iam(project)
            .list_service_accounts()
            .collect()
            .await
            .map_err(map_err(project))?;
        Ok(accounts
            .into_iter()
            .map(|a| ServiceAccount {
                email: a.email,
                display_name: a.display_name,
                extra: a.extra,
            })
            .collect())
    }

    async fn get_service_account(
        &self,
        project: &str,
        email: &str,
    ) -> Result<ServiceAccount, BackendError> {
        let a = self
            .client
            .iam(project)
            .get_service_account(email)
            .await
            .map_err(map_err(email))?;
        Ok(ServiceAccount {
            email: a.email,
            display_name: a.display_name,
            extra: a.extra,
        })
    }

    async fn list_service_account_keys(
        &self,
        project: &str,
        email: &str,
    ) -> Result<Vec<ServiceAccountKey>, BackendError> {
        let keys = self
            .client
            .iam(project)
            .list_keys(email)
            .await
            .map_err(map_err(email))?;
        Ok(keys
            .into_iter()
            .map(|k| ServiceAccountKey {
                name: k.name,
                key_type: k.key_type,
                extra: k.extra,
            })
            .collect())
    }

    async fn fetch_bucket_policy(&self, bucket: &str) -> Result<Policy, BackendError> {
        let found = self
            .client
            .storage()
            .bucket_iam_policy(bucket)
            .await
            .map_err(map_err(bucket))?;
        Ok(policy(found))
    }

    async fn fetch_dataset_policy(
        &self,
        project: &str,
        dataset: &str,
    ) -> Result<Policy, BackendError> {
        let found = self
            .client
            .bigquery(project)
            .dataset_policy(dataset)
            .await
            .map_err(map_err(dataset))?;
        Ok(policy(found))
    }

    async fn fetch_table_policy(
        &self,
        project: &str,
        dataset: &str,
        name: &str,
    ) -> Result<Policy, BackendError> {
        let found = self
            .client
            .bigquery(project)
            .table_iam_policy(dataset, name)
            .await
            .map_err(map_err(name))?;
        Ok(policy(found))
    }
}
