//! BigQuery resource.

use http::Method;
use serde_json::json;

use crate::client::{Api, GcpClient};
use crate::error::GcpError;
use crate::http_client::HttpClient;
use crate::models::{Dataset, ListDatasetsResponse, ListTablesResponse, Policy, Table};
use crate::pagination::PageStream;

/// Operations on the datasets and tables of one project.
pub struct BigQueryResource<'c, C: HttpClient> {
    client: &'c GcpClient<C>,
    project: String,
}

impl<'c, C: HttpClient> BigQueryResource<'c, C> {
    pub(crate) fn new(client: &'c GcpClient<C>, project: String) -> Self {
        Self { client, project }
    }

    /// Return a [`PageStream`] over every dataset of the project.
    pub fn list_datasets(&self) -> PageStream<C, ListDatasetsResponse> {
        PageStream::new(
            self.client.inner.clone(),
            Api::BigQuery,
            vec![
                "projects".to_owned(),
                self.project.clone(),
                "datasets".to_owned(),
            ],
            Vec::new(),
        )
    }

    /// Get a single dataset, including its access list.
    pub async fn get_dataset(&self, dataset: &str) -> Result<Dataset, GcpError> {
        self.client
            .inner
            .request(
                Method::GET,
                Api::BigQuery,
                &["projects", self.project.as_str(), "datasets", dataset],
                &[],
                None::<&()>,
            )
            .await
    }

    /// The access list of a dataset, expressed as an IAM policy.
    pub async fn dataset_policy(&self, dataset: &str) -> Result<Policy, GcpError> {
        Ok(self.get_dataset(dataset).await?.policy())
    }

    /// Return a [`PageStream`] over every table of `dataset`.
    pub fn list_tables(&self, dataset: &str) -> PageStream<C, ListTablesResponse> {
        PageStream::new(
            self.client.inner.clone(),
            Api::BigQuery,
            vec![
                "projects".to_owned(),
                self.project.clone(),
                "datasets".to_owned(),
                dataset.to_owned(),
                "tables".to_owned(),
            ],
            Vec::new(),
        )
    }

    /// Get a single table, including its schema and row count.
    pub async fn get_table(&self, dataset: &str, table: &str) -> Result<Table, GcpError> {
        self.client
            .inner
            .request(
                Method::GET,
                Api::BigQuery,
                &["projects", self.project.as_str(), "datasets", dataset, "tables", table],
                &[],
                None::<&()>,
            )
            .await
    }

    /// Get the IAM policy of a table.
    pub async fn table_iam_policy(&self, dataset: &str, table: &str) -> Result<Policy, GcpError> {
        let action = format!("{table}:getIamPolicy");
        self.client
            .inner
            .request(
                Method::POST,
                Api::BigQuery,
                &["projects", self.project.as_str(), "datasets", dataset, "tables", action.as_str()],
                &[],
                Some(&json!({})),
            )
            .await
    }
}
