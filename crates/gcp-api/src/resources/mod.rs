//! Resource namespaces of the client.

mod bigquery;
mod iam;
mod storage;

pub use bigquery::BigQueryResource;
pub use iam::IamResource;
pub use storage::StorageResource;
