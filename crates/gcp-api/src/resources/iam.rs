//! IAM resource.

use http::Method;

use crate::client::{Api, GcpClient};
use crate::error::GcpError;
use crate::http_client::HttpClient;
use crate::models::{
    ListServiceAccountKeysResponse, ListServiceAccountsResponse, ServiceAccount,
    ServiceAccountKey,
};
use crate::pagination::PageStream;

/// Operations on the service accounts of one project.
pub struct IamResource<'c, C: HttpClient> {
    client: &'c GcpClient<C>,
    project: String,
}

impl<'c, C: HttpClient> IamResource<'c, C> {
    pub(crate) fn new(client: &'c GcpClient<C>, project: String) -> Self {
        Self { client, project }
    }

    /// Return a [`PageStream`] over every service account of the project.
    pub fn list_service_accounts(&self) -> PageStream<C, ListServiceAccountsResponse> {
        PageStream::new(
            self.client.inner.clone(),
            Api::Iam,
            vec![
                "projects".to_owned(),
                self.project.clone(),
                "serviceAccounts".to_owned(),
            ],
            Vec::new(),
        )
    }

    /// Get a single service account by email.
    pub async fn get_service_account(&self, email: &str) -> Result<ServiceAccount, GcpError> {
        self.client
            .inner
            .request(
                Method::GET,
                Api::Iam,
                &["projects", self.project.as_str(), "serviceAccounts", email],
                &[],
                None::<&()>,
            )
            .await
    }

    /// List the keys of a service account. Private key material is never returned.
    pub async fn list_keys(&self, email: &str) -> Result<Vec<ServiceAccountKey>, GcpError> {
        let response: ListServiceAccountKeysResponse = self
            .client
            .inner
            .request(
                Method::GET,
                Api::Iam,
                &["projects", self.project.as_str(), "serviceAccounts", email, "keys"],
                &[],
                None::<&()>,
            )
            .await?;
        Ok(response.keys)
    }
}
