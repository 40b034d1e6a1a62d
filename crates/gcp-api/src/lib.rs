//! Rust SDK for the Cloud Storage, BigQuery and IAM REST APIs.
//!
//! Only the read operations a filesystem needs are covered.

mod backends;
mod client;
pub mod error;
mod http_client;
pub mod models;
mod pagination;
mod resources;

#[cfg(feature = "reqwest-client")]
pub use backends::ReqwestClient;
#[cfg(feature = "reqwest-client")]
pub use client::Gcp;
pub use client::{ClientBuilder, ClientConfig, GcpClient};
pub use error::{GcpError, HttpClientError};
pub use http::StatusCode;
pub use http_client::{HttpClient, HttpRequest, HttpResponse};
pub use pagination::PageStream;
pub use resources::{BigQueryResource, IamResource, StorageResource};
