//! Optional per-call logging around any [`CloudBackend`].

use std::future::Future;
use std::time::Instant;

use bytes::Bytes;
use tracing::{info, warn};

use super::{
    BackendError, Bucket, CloudBackend, Dataset, ObjectAttributes, ObjectListing, Policy,
    ServiceAccount, ServiceAccountKey, TableDescription, TableRef,
};

/// Wraps a backend and logs every call it forwards, with its outcome and latency.
///
/// When disabled the wrapper forwards calls untouched, so the mount path can always use it.
pub struct LoggingBackend<B> {
    inner: B,
    enabled: bool,
}

impl<B: CloudBackend> LoggingBackend<B> {
    /// Wrap `inner`. Calls are only logged when `enabled` is set.
    pub fn new(inner: B, enabled: bool) -> Self {
        Self { inner, enabled }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn observe<T>(
        &self,
        op: &'static str,
        resource: &str,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        if !self.enabled {
            return call.await;
        }

        let started = Instant::now();
        let res = call.await;
        let elapsed = started.elapsed();
        match &res {
            Ok(_) => info!(op, resource, ?elapsed, "backend call"),
            Err(e) => warn!(op, resource, ?elapsed, error = %e, "backend call failed"),
        }
        res
    }
}

impl<B: CloudBackend> CloudBackend for LoggingBackend<B> {
    async fn list_buckets(&self, project: &str) -> Result<Vec<Bucket>, BackendError> {
        self.observe("list_buckets", project, self.inner.list_buckets(project))
            .await
    }

    async fn get_bucket(&self, bucket: &str) -> Result<Bucket, BackendError> {
        self.observe("get_bucket", bucket, self.inner.get_bucket(bucket))
            .await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<ObjectListing, BackendError> {
        let resource = format!("gs://{bucket}/{prefix}");
        self.observe(
            "list_objects",
            &resource,
            self.inner.list_objects(bucket, prefix, delimiter),
        )
        .await
    }

    async fn get_object_attributes(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<ObjectAttributes, BackendError> {
        let resource = format!("gs://{bucket}/{object}");
        self.observe(
            "get_object_attributes",
            &resource,
            self.inner.get_object_attributes(bucket, object),
        )
        .await
    }

    async fn read_object_range(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, BackendError> {
        let resource = format!("gs://{bucket}/{object}@{offset}+{len}");
        self.observe(
            "read_object_range",
            &resource,
            self.inner.read_object_range(bucket, object, offset, len),
        )
        .await
    }

    async fn list_datasets(&self, project: &str) -> Result<Vec<Dataset>, BackendError> {
        self.observe("list_datasets", project, self.inner.list_datasets(project))
            .await
    }

    async fn list_tables(
        &self,
        project: &str,
        dataset: &str,
    ) -> Result<Vec<TableRef>, BackendError> {
        let resource = format!("{project}.{dataset}");
        self.observe(
            "list_tables",
            &resource,
            self.inner.list_tables(project, dataset),
        )
        .await
    }

    async fn describe_table(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<TableDescription, BackendError> {
        let resource = format!("{project}.{dataset}.{table}");
        self.observe(
            "describe_table",
            &resource,
            self.inner.describe_table(project, dataset, table),
        )
        .await
    }

    async fn list_service_accounts(
        &self,
        project: &str,
    ) -> Result<Vec<ServiceAccount>, BackendError> {
        self.observe(
            "list_service_accounts",
            project,
            self.inner.list_service_accounts(project),
        )
        .await
    }

    async fn get_service_account(
        &self,
        project: &str,
        email: &str,
    ) -> Result<ServiceAccount, BackendError> {
        self.observe(
            "get_service_account",
            email,
            self.inner.get_service_account(project, email),
        )
        .await
    }

    async fn list_service_account_keys(
        &self,
        project: &str,
        email: &str,
    ) -> Result<Vec<ServiceAccountKey>, BackendError> {
        self.observe(
            "list_service_account_keys",
            email,
            self.inner.list_service_account_keys(project, email),
        )
        .await
    }

    async fn fetch_bucket_policy(&self, bucket: &str) -> Result<Policy, BackendError> {
        self.observe(
            "fetch_bucket_policy",
            bucket,
            self.inner.fetch_bucket_policy(bucket),
        )
        .await
    }

    async fn fetch_dataset_policy(
        &self,
        project: &str,
        dataset: &str,
    ) -> Result<Policy, BackendError> {
        let resource = format!("{project}.{dataset}");
        self.observe(
            "fetch_dataset_policy",
            &resource,
            self.inner.fetch_dataset_policy(project, dataset),
        )
        .await
    }

    async fn fetch_table_policy(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<Policy, BackendError> {
        let resource = format!("{project}.{dataset}.{table}");
        self.observe(
            "fetch_table_policy",
            &resource,
            self.inner.fetch_table_policy(project, dataset, table),
        )
        .await
    }
}
