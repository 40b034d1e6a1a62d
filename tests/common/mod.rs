#![allow(dead_code, missing_docs, clippy::unwrap_used, clippy::expect_used)]

pub mod async_fs_mocks;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde_json::{Map, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use gcloud_fs::backend::{
    BackendError, Binding, Bucket, CloudBackend, Dataset, ObjectAttributes, ObjectListing, Policy,
    ServiceAccount, ServiceAccountKey, TableDescription, TableRef,
};
use gcloud_fs::cache::metadata::{CacheOptions, MetadataCache};
use gcloud_fs::fs::async_fs::AsyncFs;
use gcloud_fs::fs::{INode, OpenFlags};
use gcloud_fs::tree::{CloudTree, TreeOptions};

pub const PROJECT: &str = "p1";
pub const BUCKET: &str = "b1";
pub const DATASET: &str = "d1";
pub const ACCOUNT: &str = "robot@p1.iam.gserviceaccount.com";

/// A fixed timestamp, so attributes are deterministic.
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// An in-memory cloud, counting every call made against it.
#[derive(Default)]
pub struct FakeBackend {
    /// project -> buckets
    pub buckets: HashMap<String, Vec<Bucket>>,
    /// bucket -> object name -> contents
    pub objects: HashMap<String, BTreeMap<String, Bytes>>,
    /// project -> datasets
    pub datasets: HashMap<String, Vec<Dataset>>,
    /// (project, dataset) -> tables
    pub tables: HashMap<(String, String), Vec<TableDescription>>,
    /// project -> service accounts
    pub accounts: HashMap<String, Vec<ServiceAccount>>,
    /// account email -> keys
    pub keys: HashMap<String, Vec<ServiceAccountKey>>,
    /// Policies keyed by `bucket:<b>`, `dataset:<p>:<d>` or `table:<p>:<d>:<t>`.
    pub policies: HashMap<String, Policy>,
    /// Errors returned by an operation instead of its result, until cleared.
    pub failures: Mutex<HashMap<&'static str, BackendError>>,
    /// Latency added to every call.
    pub delay: Option<Duration>,
    calls: Mutex<HashMap<&'static str, usize>>,
    ranges: Mutex<Vec<(String, u64, u64)>>,
}

impl FakeBackend {
    /// One project with a bucket, a dataset with two tables, a service account and a policy at
    /// each scope.
    pub fn sample() -> Self {
        let mut backend = Self::default();

        backend.buckets.insert(
            PROJECT.to_owned(),
            vec![Bucket {
                name: BUCKET.to_owned(),
                location: Some("EU".to_owned()),
                time_created: Some(epoch()),
                extra: Map::new(),
            }],
        );

        let mut objects = BTreeMap::new();
        for (name, content) in [
            ("top.txt", "hello from the top\n"),
            ("logs/a.txt", "alpha\n"),
            ("logs/2024/b.txt", "bravo\n"),
            (".hidden", "secret\n"),
            ("shadow", "i am an object\n"),
            ("shadow/inner.txt", "i am below a prefix\n"),
        ] {
            objects.insert(name.to_owned(), Bytes::from_static(content.as_bytes()));
        }
        backend.objects.insert(BUCKET.to_owned(), objects);

        backend.datasets.insert(
            PROJECT.to_owned(),
            vec![Dataset {
                dataset_id: DATASET.to_owned(),
                location: Some("EU".to_owned()),
                extra: Map::new(),
            }],
        );
        backend.tables.insert(
            (PROJECT.to_owned(), DATASET.to_owned()),
            vec![table("t1", Some(42)), table("t2", None)],
        );

        backend.accounts.insert(
            PROJECT.to_owned(),
            vec![ServiceAccount {
                email: ACCOUNT.to_owned(),
                display_name: Some("Robot".to_owned()),
                extra: Map::new(),
            }],
        );
        backend.keys.insert(
            ACCOUNT.to_owned(),
            vec![ServiceAccountKey {
                name: format!("projects/{PROJECT}/serviceAccounts/{ACCOUNT}/keys/k1"),
                key_type: Some("USER_MANAGED".to_owned()),
                extra: Map::new(),
            }],
        );

        backend.policies.insert(
            format!("bucket:{BUCKET}"),
            policy(&[
                ("roles/storage.objectViewer", &["user:alice@x.com", "group:eng@x.com"]),
                ("roles/storage.admin", &["user:alice@x.com"]),
            ]),
        );
        backend.policies.insert(
            format!("dataset:{PROJECT}:{DATASET}"),
            policy(&[("roles/bigquery.dataViewer", &["user:bob@x.com"])]),
        );
        backend.policies.insert(
            format!("table:{PROJECT}:{DATASET}:t1"),
            policy(&[("projects/p1/roles/custom", &["serviceAccount:robot@p1.iam.gserviceaccount.com"])]),
        );

        backend
    }

    /// Make every call to `op` fail with `err`.
    pub fn fail(&self, op: &'static str, err: BackendError) {
        self.failures.lock().unwrap().insert(op, err);
    }

    /// Let `op` succeed again.
    pub fn heal(&self, op: &'static str) {
        self.failures.lock().unwrap().remove(op);
    }

    /// How many times `op` was called.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// How many calls were made in total.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Every `(object, offset, len)` ranged read, in call order.
    pub fn ranges(&self) -> Vec<(String, u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }

    async fn record(&self, op: &'static str) -> Result<(), BackendError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.lock().unwrap().get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn bucket_objects(&self, bucket: &str) -> Result<&BTreeMap<String, Bytes>, BackendError> {
        self.objects
            .get(bucket)
            .ok_or_else(|| BackendError::NotFound(format!("bucket {bucket}")))
    }

    fn policy(&self, key: String) -> Result<Policy, BackendError> {
        self.policies
            .get(&key)
            .cloned()
            .ok_or(BackendError::NotFound(key))
    }
}

fn attributes(name: &str, content: &Bytes) -> ObjectAttributes {
    ObjectAttributes {
        name: name.to_owned(),
        size: content.len() as u64,
        updated: Some(epoch()),
        time_created: Some(epoch()),
        content_type: Some("text/plain".to_owned()),
        extra: Map::new(),
    }
}

pub fn table(id: &str, rows: Option<u64>) -> TableDescription {
    let mut extra = Map::new();
    extra.insert("type".to_owned(), json!("TABLE"));
    TableDescription {
        table_id: id.to_owned(),
        num_rows: rows,
        num_bytes: rows.map(|r| r * 100),
        last_modified: Some(epoch()),
        schema: json!({"fields": [{"name": "id", "type": "INTEGER"}]}),
        extra,
    }
}

pub fn policy(bindings: &[(&str, &[&str])]) -> Policy {
    Policy {
        bindings: bindings
            .iter()
            .map(|(role, members)| Binding {
                role: (*role).to_owned(),
                members: members.iter().map(|m| (*m).to_owned()).collect(),
                condition: None,
            })
            .collect(),
        etag: Some("BwX1".to_owned()),
        extra: Map::new(),
    }
}

impl CloudBackend for FakeBackend {
    async fn list_buckets(&self, project: &str) -> Result<Vec<Bucket>, BackendError> {
        self.record("list_buckets").await?;
        Ok(self.buckets.get(project).cloned().unwrap_or_default())
    }

    async fn get_bucket(&self, bucket: &str) -> Result<Bucket, BackendError> {
        self.record("get_bucket").await?;
        self.buckets
            .values()
            .flatten()
            .find(|b| b.name == bucket)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("bucket {bucket}")))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<ObjectListing, BackendError> {
        self.record("list_objects").await?;
        let mut objects = Vec::new();
        let mut prefixes = BTreeSet::new();
        for (name, content) in self.bucket_objects(bucket)?.range(prefix.to_owned()..) {
            let Some(rest) = name.strip_prefix(prefix) else {
                break;
            };
            match rest.find(delimiter).filter(|_| !delimiter.is_empty()) {
                Some(at) => {
                    prefixes.insert(format!("{prefix}{}", &rest[..at + delimiter.len()]));
                }
                None => objects.push(attributes(name, content)),
            }
        }
        Ok(ObjectListing {
            objects,
            prefixes: prefixes.into_iter().collect(),
        })
    }

    async fn get_object_attributes(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<ObjectAttributes, BackendError> {
        self.record("get_object_attributes").await?;
        self.bucket_objects(bucket)?
            .get(object)
            .map(|content| attributes(object, content))
            .ok_or_else(|| BackendError::NotFound(format!("object {object}")))
    }

    async fn read_object_range(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, BackendError> {
        self.record("read_object_range").await?;
        self.ranges
            .lock()
            .unwrap()
            .push((object.to_owned(), offset, len));
        let content = self
            .bucket_objects(bucket)?
            .get(object)
            .ok_or_else(|| BackendError::NotFound(format!("object {object}")))?;
        let start = usize::try_from(offset).unwrap().min(content.len());
        let end = usize::try_from(offset + len).unwrap().min(content.len());
        Ok(content.slice(start..end))
    }

    async fn list_datasets(&self, project: &str) -> Result<Vec<Dataset>, BackendError> {
        self.record("list_datasets").await?;
        Ok(self.datasets.get(project).cloned().unwrap_or_default())
    }

    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<TableRef>, BackendError> {
        self.record("list_tables").await?;
        let tables = self
            .tables
            .get(&(project.to_owned(), dataset.to_owned()))
            .ok_or_else(|| BackendError::NotFound(format!("dataset {dataset}")))?;
        Ok(tables
            .iter()
            .map(|t| TableRef {
                table_id: t.table_id.clone(),
                extra: Map::new(),
            })
            .collect())
    }

    async fn describe_table(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<TableDescription, BackendError> {
        self.record("describe_table").await?;
        self.tables
            .get(&(project.to_owned(), dataset.to_owned()))
            .and_then(|tables| tables.iter().find(|t| t.table_id == table))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("table {table}")))
    }

    async fn list_service_accounts(
        &self,
        project: &str,
    ) -> Result<Vec<ServiceAccount>, BackendError> {
        self.record("list_service_accounts").await?;
        Ok(self.accounts.get(project).cloned().unwrap_or_default())
    }

    async fn get_service_account(
        &self,
        project: &str,
        email: &str,
    ) -> Result<ServiceAccount, BackendError> {
        self.record("get_service_account").await?;
        self.accounts
            .get(project)
            .and_then(|accounts| accounts.iter().find(|a| a.email == email))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("account {email}")))
    }

    async fn list_service_account_keys(
        &self,
        _project: &str,
        email: &str,
    ) -> Result<Vec<ServiceAccountKey>, BackendError> {
        self.record("list_service_account_keys").await?;
        Ok(self.keys.get(email).cloned().unwrap_or_default())
    }

    async fn fetch_bucket_policy(&self, bucket: &str) -> Result<Policy, BackendError> {
        self.record("fetch_bucket_policy").await?;
        self.policy(format!("bucket:{bucket}"))
    }

    async fn fetch_dataset_policy(
        &self,
        project: &str,
        dataset: &str,
    ) -> Result<Policy, BackendError> {
        self.record("fetch_dataset_policy").await?;
        self.policy(format!("dataset:{project}:{dataset}"))
    }

    async fn fetch_table_policy(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<Policy, BackendError> {
        self.record("fetch_table_policy").await?;
        self.policy(format!("table:{project}:{dataset}:{table}"))
    }
}

/// A mounted-but-not-kernel-attached filesystem over a [`FakeBackend`].
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub fs: AsyncFs<CloudTree<FakeBackend>>,
    tree: CloudTree<FakeBackend>,
    pub cancel: CancellationToken,
    pub cache_dir: TempDir,
}

impl Harness {
    pub async fn new(backend: FakeBackend) -> Self {
        Self::with_options(backend, TreeOptions::for_project(PROJECT)).await
    }

    pub async fn with_options(backend: FakeBackend, options: TreeOptions) -> Self {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::open(cache_dir.path(), CacheOptions::default())
            .await
            .unwrap();
        let backend = Arc::new(backend);
        let cancel = CancellationToken::new();
        let tree = CloudTree::new(
            Arc::clone(&backend),
            Arc::new(cache),
            options,
            cancel.clone(),
        );
        let root = tree.root_inode();
        Self {
            backend,
            fs: AsyncFs::new(tree.clone(), root),
            tree,
            cancel,
            cache_dir,
        }
    }

    pub fn tree(&self) -> &CloudTree<FakeBackend> {
        &self.tree
    }

    /// Walk `path` (slash separated, relative to the mount root) one lookup at a time.
    pub async fn resolve(&self, path: &str) -> Result<INode, std::io::Error> {
        let mut current = self.tree().root_inode();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.fs.lookup(current.addr, OsStr::new(component)).await?;
        }
        Ok(current)
    }

    /// Names listed in the directory at `path`, in listing order.
    pub async fn list(&self, path: &str) -> Result<Vec<String>, std::io::Error> {
        let dir = self.resolve(path).await?;
        let mut names = Vec::new();
        self.fs
            .readdir(dir.addr, 0, |entry, _| {
                names.push(entry.name.to_string_lossy().into_owned());
                false
            })
            .await?;
        Ok(names)
    }

    /// The whole content of the file at `path`, read in small chunks.
    pub async fn read(&self, path: &str) -> Result<Bytes, std::io::Error> {
        let file = self.resolve(path).await?;
        let handle = self.fs.open(file.addr, OpenFlags::RDONLY).await?;
        let mut out = BytesMut::new();
        loop {
            let chunk = handle.read(out.len() as u64, 7).await?;
            if chunk.is_empty() {
                return Ok(out.freeze());
            }
            out.extend_from_slice(&chunk);
        }
    }
}
