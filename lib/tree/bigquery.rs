//! Datasets and tables.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, trace};

use super::node::{keys, names};
use super::{Attrs, Entry, Fetcher, Listing, NodeId, TreeInner, render_json};
use crate::backend::{CloudBackend, Dataset, TableDescription, TableRef};
use crate::cache::metadata::{CacheError, ttl};

impl<B: CloudBackend> Fetcher<B> {
    async fn table(
        self,
        project: String,
        dataset: String,
        table: String,
    ) -> Result<TableDescription, CacheError> {
        let key = keys::table(&project, &dataset, &table);
        self.json(key, ttl::LONG, move |backend| async move {
            backend.describe_table(&project, &dataset, &table).await
        })
        .await
    }

    /// Row count of a table. Cached apart from the descriptor, on a shorter tier.
    pub(super) async fn row_count(
        self,
        project: String,
        dataset: String,
        table: String,
    ) -> Result<u64, CacheError> {
        let key = keys::table_rows(&project, &dataset, &table);
        self.json(key, ttl::MEDIUM, move |backend| async move {
            let description = backend.describe_table(&project, &dataset, &table).await?;
            Ok(description.num_rows.unwrap_or(0))
        })
        .await
    }
}

impl<B: CloudBackend> TreeInner<B> {
    pub(super) async fn list_datasets(&self, project: &str) -> Result<Listing, std::io::Error> {
        let owned = project.to_owned();
        let datasets: Vec<Dataset> = self
            .fetch
            .clone()
            .json(keys::datasets(project), ttl::SHORT, move |backend| async move {
                backend.list_datasets(&owned).await
            })
            .await?;

        Ok(datasets
            .into_iter()
            .filter(|d| names::is_visible(&d.dataset_id))
            .map(|d| {
                let node = NodeId::Dataset {
                    project: project.to_owned(),
                    dataset: d.dataset_id.clone(),
                };
                (d.dataset_id, Entry::dir(node))
            })
            .collect())
    }

    /// List the tables of a dataset, prefetching every row count so the table directories
    /// report their sizes right away.
    pub(super) async fn list_dataset(
        &self,
        project: &str,
        dataset: &str,
    ) -> Result<Listing, std::io::Error> {
        let (p, d) = (project.to_owned(), dataset.to_owned());
        let tables: Vec<TableRef> = self
            .fetch
            .clone()
            .json(keys::tables(project, dataset), ttl::SHORT, move |backend| async move {
                backend.list_tables(&p, &d).await
            })
            .await?;

        let ids: Vec<String> = tables
            .into_iter()
            .map(|t| t.table_id)
            .filter(|id| names::is_visible(id))
            .collect();

        let rows = self
            .lister
            .fetch_all(ids.clone(), |table| {
                self.fetch
                    .clone()
                    .row_count(project.to_owned(), dataset.to_owned(), table)
            })
            .await;
        if !rows.is_complete() {
            debug!(
                project,
                dataset,
                failed = rows.failed.len(),
                "row count prefetch incomplete"
            );
            for (table, failure) in &rows.failed {
                trace!(project, dataset, table = %table, ?failure, "row count prefetch failed");
            }
        }
        let counts: HashMap<String, u64> = rows.succeeded.into_iter().collect();

        let mut out: Listing = ids
            .into_iter()
            .map(|table| {
                let size = counts.get(&table).copied().unwrap_or(0);
                let entry = Entry {
                    node: NodeId::Table {
                        project: project.to_owned(),
                        dataset: dataset.to_owned(),
                        table: table.clone(),
                    },
                    attrs: Attrs::dir().with_size(size),
                };
                (table, entry)
            })
            .collect();
        out.insert(
            names::META.to_owned(),
            Entry::dir(NodeId::DatasetMeta {
                project: project.to_owned(),
                dataset: dataset.to_owned(),
            }),
        );
        Ok(out)
    }

    async fn describe(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<TableDescription, CacheError> {
        self.fetch
            .clone()
            .table(project.to_owned(), dataset.to_owned(), table.to_owned())
            .await
    }

    pub(super) async fn table_schema(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<Bytes, std::io::Error> {
        let description = self.describe(project, dataset, table).await?;
        render_json(&description.schema)
    }

    /// The table descriptor with its schema left out.
    pub(super) async fn table_metadata(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<Bytes, std::io::Error> {
        let description = self.describe(project, dataset, table).await?;
        let mut value = serde_json::to_value(&description)
            .map_err(|_| std::io::Error::from_raw_os_error(libc::EIO))?;
        if let Some(fields) = value.as_object_mut() {
            fields.remove("schema");
        }
        render_json(&value)
    }
}
