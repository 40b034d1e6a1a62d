//! The client, its configuration and request plumbing.

use std::sync::Arc;
#[cfg(feature = "reqwest-client")]
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

#[cfg(feature = "reqwest-client")]
use crate::backends::ReqwestClient;
use crate::error::GcpError;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::resources::{BigQueryResource, IamResource, StorageResource};

const STORAGE_URL: &str = "https://storage.googleapis.com/storage/v1";
const BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const IAM_URL: &str = "https://iam.googleapis.com/v1";

/// The default client type, backed by `reqwest`.
#[cfg(feature = "reqwest-client")]
pub type Gcp = GcpClient<ReqwestClient>;

/// Where requests go and how they are authenticated.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// OAuth2 bearer token sent with every request.
    pub access_token: String,
    /// Base URL of the Cloud Storage JSON API.
    pub storage_url: String,
    /// Base URL of the BigQuery API.
    pub bigquery_url: String,
    /// Base URL of the IAM API.
    pub iam_url: String,
}

impl ClientConfig {
    /// Production endpoints, authenticated with `access_token`.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            storage_url: STORAGE_URL.to_owned(),
            bigquery_url: BIGQUERY_URL.to_owned(),
            iam_url: IAM_URL.to_owned(),
        }
    }
}

/// Which API a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Api {
    Storage,
    BigQuery,
    Iam,
}

/// Builder for [`GcpClient`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
    #[cfg(feature = "reqwest-client")]
    timeout: Duration,
}

impl ClientBuilder {
    /// Start a builder authenticated with `access_token`.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            config: ClientConfig::new(access_token),
            #[cfg(feature = "reqwest-client")]
            timeout: Duration::from_secs(30),
        }
    }

    /// Override the Cloud Storage base URL.
    #[must_use]
    pub fn storage_url(mut self, url: impl Into<String>) -> Self {
        self.config.storage_url = url.into();
        self
    }

    /// Override the BigQuery base URL.
    #[must_use]
    pub fn bigquery_url(mut self, url: impl Into<String>) -> Self {
        self.config.bigquery_url = url.into();
        self
    }

    /// Override the IAM base URL.
    #[must_use]
    pub fn iam_url(mut self, url: impl Into<String>) -> Self {
        self.config.iam_url = url.into();
        self
    }

    /// Per-request timeout of the default HTTP backend.
    #[cfg(feature = "reqwest-client")]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a client on the default HTTP backend.
    #[cfg(feature = "reqwest-client")]
    #[must_use]
    pub fn build(self) -> Gcp {
        let http = ReqwestClient::new(self.timeout);
        GcpClient::with_http_client(http, self.config)
    }

    /// Build a client on a caller-provided HTTP backend.
    #[must_use]
    pub fn build_with<C: HttpClient>(self, http: C) -> GcpClient<C> {
        GcpClient::with_http_client(http, self.config)
    }
}

pub(crate) struct ClientInner<C> {
    http: C,
    config: ClientConfig,
}

impl<C: HttpClient> ClientInner<C> {
    fn base(&self, api: Api) -> &str {
        match api {
            Api::Storage => &self.config.storage_url,
            Api::BigQuery => &self.config.bigquery_url,
            Api::Iam => &self.config.iam_url,
        }
    }

    /// Join `segments` onto the base URL of `api`, escaping each one as a single path segment.
    pub(crate) fn url(
        &self,
        api: Api,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<String, GcpError> {
        let base = self.base(api);
        let mut url = Url::parse(base).map_err(|e| GcpError::Url(format!("{base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| GcpError::Url(format!("{base}: cannot be a base")))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url.into())
    }

    /// Send an authenticated request and return the response whatever its status.
    pub(crate) async fn execute(
        &self,
        method: Method,
        url: String,
        mut headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<HttpResponse, GcpError> {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.access_token))
            .map_err(|_| GcpError::InvalidToken)?;
        headers.insert(AUTHORIZATION, bearer);
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let request = HttpRequest {
            method,
            url,
            headers,
            body,
        };
        Ok(self.http.send(request).await?)
    }

    /// Send a JSON request and decode a JSON response.
    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        api: Api,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<&impl Serialize>,
    ) -> Result<T, GcpError> {
        let url = self.url(api, segments, query)?;
        let body = body
            .map(serde_json::to_vec)
            .transpose()?
            .map(Bytes::from);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = ensure_success(self.execute(method, url, headers, body).await?)?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

/// Turn a non-success response into a [`GcpError::Api`].
pub(crate) fn ensure_success(response: HttpResponse) -> Result<HttpResponse, GcpError> {
    if response.status.is_success() {
        Ok(response)
    } else {
        Err(GcpError::from_response(response.status, &response.body))
    }
}

/// Client for the Cloud Storage, BigQuery and IAM APIs.
///
/// Cheap to clone; clones share one HTTP backend.
pub struct GcpClient<C: HttpClient> {
    pub(crate) inner: Arc<ClientInner<C>>,
}

impl<C: HttpClient> Clone for GcpClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: HttpClient> std::fmt::Debug for GcpClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpClient")
            .field("storage_url", &self.inner.config.storage_url)
            .field("bigquery_url", &self.inner.config.bigquery_url)
            .field("iam_url", &self.inner.config.iam_url)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "reqwest-client")]
impl GcpClient<ReqwestClient> {
    /// Start building a client authenticated with `access_token`.
    #[must_use]
    pub fn builder(access_token: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(access_token)
    }
}

impl<C: HttpClient> GcpClient<C> {
    /// Wrap an HTTP backend.
    #[must_use]
    pub fn with_http_client(http: C, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner { http, config }),
        }
    }

    #[cfg(test)]
    pub(crate) fn inner_http(&self) -> &C {
        &self.inner.http
    }

    /// Cloud Storage operations.
    #[must_use]
    pub fn storage(&self) -> StorageResource<'_, C> {
        StorageResource::new(self)
    }

    /// BigQuery operations within `project`.
    #[must_use]
    pub fn bigquery(&self, project: impl Into<String>) -> BigQueryResource<'_, C> {
        BigQueryResource::new(self, project.into())
    }

    /// IAM operations within `project`.
    #[must_use]
    pub fn iam(&self, project: impl Into<String>) -> IamResource<'_, C> {
        IamResource::new(self, project.into())
    }
}
