//! The collaborator interface the filesystem reads cloud resources through.
//!
//! Implementations are thin request/response functions against a cloud API. The filesystem only
//! ever calls them from inside metadata-cache generators (or the read-ahead buffer), so every
//! method is free to be slow.

mod logging;
pub mod model;

use std::future::Future;

use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use logging::LoggingBackend;
pub use model::{
    Binding, Bucket, Dataset, ObjectAttributes, ObjectListing, Policy, ServiceAccount,
    ServiceAccountKey, TableDescription, TableRef,
};

/// Errors reported by a [`CloudBackend`].
///
/// `Clone` so that a single failed generator can hand the same error to every coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The addressed resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// The call was abandoned because its context was cancelled.
    #[error("backend call cancelled")]
    Cancelled,
}

impl BackendError {
    /// Whether this error means "the resource does not exist".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Status { status: 404, .. }
        )
    }
}

/// Cloud API operations consumed by the filesystem.
///
/// Uses Rust edition 2024's native `impl Future` in traits, like the HTTP SDK it is usually
/// backed by.
pub trait CloudBackend: Send + Sync + 'static {
    /// List the buckets in a project.
    fn list_buckets(
        &self,
        project: &str,
    ) -> impl Future<Output = Result<Vec<Bucket>, BackendError>> + Send;

    /// Describe a single bucket.
    fn get_bucket(&self, bucket: &str)
    -> impl Future<Output = Result<Bucket, BackendError>> + Send;

    /// List one level of objects under `prefix`, folding deeper names into prefixes that end
    /// with `delimiter`.
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> impl Future<Output = Result<ObjectListing, BackendError>> + Send;

    /// Fetch the attributes of a single object.
    fn get_object_attributes(
        &self,
        bucket: &str,
        object: &str,
    ) -> impl Future<Output = Result<ObjectAttributes, BackendError>> + Send;

    /// Read up to `len` bytes of an object starting at `offset`.
    ///
    /// Returning fewer bytes than requested is only allowed at the end of the object.
    fn read_object_range(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
        len: u64,
    ) -> impl Future<Output = Result<Bytes, BackendError>> + Send;

    /// List the datasets in a project.
    fn list_datasets(
        &self,
        project: &str,
    ) -> impl Future<Output = Result<Vec<Dataset>, BackendError>> + Send;

    /// List the tables in a dataset.
    fn list_tables(
        &self,
        project: &str,
        dataset: &str,
    ) -> impl Future<Output = Result<Vec<TableRef>, BackendError>> + Send;

    /// Describe a table, including its schema and row count.
    fn describe_table(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> impl Future<Output = Result<TableDescription, BackendError>> + Send;

    /// List the service accounts in a project.
    fn list_service_accounts(
        &self,
        project: &str,
    ) -> impl Future<Output = Result<Vec<ServiceAccount>, BackendError>> + Send;

    /// Describe a single service account.
    fn get_service_account(
        &self,
        project: &str,
        email: &str,
    ) -> impl Future<Output = Result<ServiceAccount, BackendError>> + Send;

    /// List the keys of a service account.
    fn list_service_account_keys(
        &self,
        project: &str,
        email: &str,
    ) -> impl Future<Output = Result<Vec<ServiceAccountKey>, BackendError>> + Send;

    /// Fetch the access policy of a bucket.
    fn fetch_bucket_policy(
        &self,
        bucket: &str,
    ) -> impl Future<Output = Result<Policy, BackendError>> + Send;

    /// Fetch the access policy of a dataset.
    fn fetch_dataset_policy(
        &self,
        project: &str,
        dataset: &str,
    ) -> impl Future<Output = Result<Policy, BackendError>> + Send;

    /// Fetch the access policy of a table.
    fn fetch_table_policy(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> impl Future<Output = Result<Policy, BackendError>> + Send;
}

/// Race a backend call against a cancellation token.
///
/// Dropping the call future aborts the request; the caller sees [`BackendError::Cancelled`].
pub async fn cancellable<T>(
    token: &CancellationToken,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(BackendError::Cancelled),
        res = call => res,
    }
}
