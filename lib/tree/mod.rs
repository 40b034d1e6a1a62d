//! The cloud resource hierarchy served by the filesystem.
//!
//! [`CloudTree`] implements [`FsDataProvider`] over a closed set of [`NodeId`]s. Nodes own no
//! data: every listing, attribute and descriptor is read through the [`MetadataCache`], whose
//! generators are the only place a [`CloudBackend`] is ever called (apart from ranged object
//! reads, which go through a per-handle read-ahead buffer).

mod bigquery;
mod iam;
pub mod node;
pub mod policy;
mod reader;
mod storage;

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt as _, stream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::backend::{BackendError, CloudBackend, cancellable};
use crate::cache::metadata::{CacheError, MetadataCache};
use crate::fs::arena::NodeArena;
use crate::fs::async_fs::FsDataProvider;
use crate::fs::readahead::{DEFAULT_READ_AHEAD, ReadAheadBuffer};
use crate::fs::{INode, INodeType, InodeAddr, InodePerms, OpenFlags, errno};
use crate::lister::{ConcurrentLister, DEFAULT_CONCURRENCY};

pub use node::{NodeId, PolicyScope, Service, VirtualFile};
pub use reader::{NodeReader, ObjectSource};

use node::names;

fn enoent() -> std::io::Error {
    std::io::Error::from_raw_os_error(libc::ENOENT)
}

/// How a [`CloudTree`] presents itself.
#[derive(Debug, Clone)]
pub struct TreeOptions {
    /// Projects listed at the mount root.
    pub projects: Vec<String>,
    /// Owner reported for every node.
    pub uid: u32,
    /// Group reported for every node.
    pub gid: u32,
    /// Read-ahead window of each object handle, in bytes.
    pub read_ahead: u64,
    /// Bound on concurrent prefetch calls.
    pub lister_concurrency: usize,
}

impl TreeOptions {
    /// Options for a single project, owned by the calling user.
    #[must_use]
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            projects: vec![project.into()],
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            read_ahead: DEFAULT_READ_AHEAD,
            lister_concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Attributes of a node before it has an address.
#[derive(Debug, Clone, Copy)]
struct Attrs {
    kind: INodeType,
    size: u64,
    modified: Option<SystemTime>,
    created: Option<SystemTime>,
}

impl Attrs {
    fn dir() -> Self {
        Self {
            kind: INodeType::Directory,
            size: 0,
            modified: None,
            created: None,
        }
    }

    fn file(size: u64) -> Self {
        Self {
            kind: INodeType::File,
            size,
            modified: None,
            created: None,
        }
    }

    fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    fn modified(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.modified = at.map(SystemTime::from);
        self
    }

    fn created(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.created = at.map(SystemTime::from);
        self
    }
}

/// A listed child.
#[derive(Debug, Clone)]
struct Entry {
    node: NodeId,
    attrs: Attrs,
}

impl Entry {
    fn dir(node: NodeId) -> Self {
        Self {
            node,
            attrs: Attrs::dir(),
        }
    }

    fn file(node: NodeId) -> Self {
        Self {
            node,
            attrs: Attrs::file(0),
        }
    }
}

/// Children keyed by name. The map keeps listings sorted and free of duplicates.
type Listing = BTreeMap<String, Entry>;

/// Runs backend calls through the metadata cache.
///
/// Owns everything it touches so that the futures it returns are `'static`, which is what the
/// cache's generators and the concurrent lister require.
struct Fetcher<B> {
    backend: Arc<B>,
    cache: Arc<MetadataCache>,
    cancel: CancellationToken,
}

impl<B> Clone for Fetcher<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cache: Arc::clone(&self.cache),
            cancel: self.cancel.clone(),
        }
    }
}

impl<B: CloudBackend> Fetcher<B> {
    /// Read `key` as a typed value, calling the backend on a miss.
    async fn json<T, F, Fut>(self, key: String, ttl: Duration, call: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(Arc<B>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let Self {
            backend,
            cache,
            cancel,
        } = self;
        cache
            .get_json(&key, ttl, move || async move {
                cancellable(&cancel, call(backend)).await
            })
            .await
    }

    /// Read `key` as the normalized JSON bytes it is stored as.
    async fn raw<T, F, Fut>(self, key: String, ttl: Duration, call: F) -> Result<Bytes, CacheError>
    where
        T: Serialize + Send + 'static,
        F: FnOnce(Arc<B>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let Self {
            backend,
            cache,
            cancel,
        } = self;
        cache
            .get(&key, ttl, move || async move {
                let value = cancellable(&cancel, call(backend)).await?;
                serde_json::to_vec(&value)
                    .map(Bytes::from)
                    .map_err(|e| BackendError::Malformed(e.to_string()))
            })
            .await
    }
}

/// Pretty-print a value the same way the cache normalizes payloads.
fn render_json<T: Serialize>(value: &T) -> Result<Bytes, std::io::Error> {
    let mut out = serde_json::to_vec_pretty(value)
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EIO))?;
    out.push(b'\n');
    Ok(Bytes::from(out))
}

struct TreeInner<B> {
    fetch: Fetcher<B>,
    lister: ConcurrentLister,
    arena: NodeArena<NodeId>,
    options: TreeOptions,
    mounted_at: SystemTime,
}

/// The filesystem hierarchy over a [`CloudBackend`].
///
/// Cheap to clone; clones share the same arena, cache and backend.
pub struct CloudTree<B> {
    inner: Arc<TreeInner<B>>,
}

impl<B> Clone for CloudTree<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: CloudBackend> CloudTree<B> {
    /// Build a tree reading through `cache`.
    ///
    /// Backend calls made on behalf of the tree are abandoned once `cancel` fires.
    pub fn new(
        backend: Arc<B>,
        cache: Arc<MetadataCache>,
        options: TreeOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(TreeInner {
                fetch: Fetcher {
                    backend,
                    cache,
                    cancel,
                },
                lister: ConcurrentLister::new(options.lister_concurrency),
                arena: NodeArena::new(NodeId::Root),
                options,
                mounted_at: SystemTime::now(),
            }),
        }
    }

    /// The inode of the mount root.
    #[must_use]
    pub fn root_inode(&self) -> INode {
        self.inner
            .inode(NodeArena::<NodeId>::ROOT_ADDR, Attrs::dir())
    }

    /// The metadata cache this tree reads through.
    #[must_use]
    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.inner.fetch.cache
    }

    /// The identity behind `addr`, if it has been materialized.
    #[must_use]
    pub fn node(&self, addr: InodeAddr) -> Option<NodeId> {
        self.inner.arena.resolve(addr)
    }

    fn resolve(&self, addr: InodeAddr) -> Result<NodeId, std::io::Error> {
        self.node(addr).ok_or_else(enoent)
    }
}

impl<B: CloudBackend> TreeInner<B> {
    fn inode(&self, addr: InodeAddr, attrs: Attrs) -> INode {
        INode {
            addr,
            permissions: match attrs.kind {
                INodeType::Directory => InodePerms::READ_ONLY_DIR,
                INodeType::File => InodePerms::READ_ONLY_FILE,
            },
            uid: self.options.uid,
            gid: self.options.gid,
            create_time: attrs.created.unwrap_or(self.mounted_at),
            last_modified_at: attrs.modified.unwrap_or(self.mounted_at),
            size: attrs.size,
            itype: attrs.kind,
        }
    }

    /// Children whose names and kinds never depend on the backend.
    fn fixed_children(node: &NodeId) -> Option<Listing> {
        let mut out = Listing::new();
        let mut dir = |name: &str, node: NodeId| {
            out.insert(name.to_owned(), Entry::dir(node));
        };
        match node {
            NodeId::Project { project } => {
                for service in Service::ALL {
                    dir(
                        service.dir_name(),
                        NodeId::Service {
                            project: project.clone(),
                            service,
                        },
                    );
                }
            }
            NodeId::StorageMeta { bucket, prefix } => {
                dir(
                    names::OBJECTS,
                    NodeId::ObjectDescriptors {
                        bucket: bucket.clone(),
                        prefix: prefix.clone(),
                    },
                );
                dir(
                    names::IAM,
                    NodeId::Policy(PolicyScope::Bucket {
                        bucket: bucket.clone(),
                    }),
                );
                out.insert(
                    names::BUCKET_JSON.to_owned(),
                    Entry::file(NodeId::File(VirtualFile::BucketDescriptor {
                        bucket: bucket.clone(),
                    })),
                );
            }
            NodeId::DatasetMeta { project, dataset } => {
                dir(
                    names::IAM,
                    NodeId::Policy(PolicyScope::Dataset {
                        project: project.clone(),
                        dataset: dataset.clone(),
                    }),
                );
            }
            NodeId::Table {
                project,
                dataset,
                table,
            } => {
                dir(
                    names::META,
                    NodeId::TableMeta {
                        project: project.clone(),
                        dataset: dataset.clone(),
                        table: table.clone(),
                    },
                );
                out.insert(
                    names::SCHEMA_JSON.to_owned(),
                    Entry::file(NodeId::File(VirtualFile::TableSchema {
                        project: project.clone(),
                        dataset: dataset.clone(),
                        table: table.clone(),
                    })),
                );
                out.insert(
                    names::METADATA_JSON.to_owned(),
                    Entry::file(NodeId::File(VirtualFile::TableMetadata {
                        project: project.clone(),
                        dataset: dataset.clone(),
                        table: table.clone(),
                    })),
                );
            }
            NodeId::TableMeta {
                project,
                dataset,
                table,
            } => {
                dir(
                    names::IAM,
                    NodeId::Policy(PolicyScope::Table {
                        project: project.clone(),
                        dataset: dataset.clone(),
                        table: table.clone(),
                    }),
                );
            }
            NodeId::ServiceAccount { project, email } => {
                out.insert(
                    names::ACCOUNT_JSON.to_owned(),
                    Entry::file(NodeId::File(VirtualFile::AccountDescriptor {
                        project: project.clone(),
                        email: email.clone(),
                    })),
                );
                out.insert(
                    names::KEYS_JSON.to_owned(),
                    Entry::file(NodeId::File(VirtualFile::AccountKeys {
                        project: project.clone(),
                        email: email.clone(),
                    })),
                );
            }
            NodeId::Policy(scope) => {
                dir(names::BY_ROLE, NodeId::PolicyByRole(scope.clone()));
                dir(names::BY_MEMBER, NodeId::PolicyByMember(scope.clone()));
                out.insert(
                    names::POLICY_JSON.to_owned(),
                    Entry::file(NodeId::File(VirtualFile::PolicyDocument(scope.clone()))),
                );
            }
            NodeId::Root
            | NodeId::Service { .. }
            | NodeId::ObjectDir { .. }
            | NodeId::Object { .. }
            | NodeId::ObjectDescriptors { .. }
            | NodeId::Dataset { .. }
            | NodeId::PolicyByRole(_)
            | NodeId::PolicyRole { .. }
            | NodeId::PolicyByMember(_)
            | NodeId::PolicyMember { .. }
            | NodeId::File(_) => return None,
        }
        Some(out)
    }

    /// List the children of `node`, with generated files sized by their content.
    async fn list(&self, node: &NodeId) -> Result<Listing, std::io::Error> {
        let mut listing = self.list_children(node).await?;
        self.size_generated_files(&mut listing).await;
        Ok(listing)
    }

    /// Set the size of every generated file in `listing` to the length `read` will serve.
    ///
    /// A file whose content cannot be produced keeps size 0; looking it up reports the error.
    async fn size_generated_files(&self, listing: &mut Listing) {
        let files: Vec<(String, VirtualFile)> = listing
            .iter()
            .filter_map(|(name, entry)| match &entry.node {
                NodeId::File(VirtualFile::RoleMember { .. } | VirtualFile::MemberRole { .. }) => {
                    None
                }
                NodeId::File(file) => Some((name.clone(), file.clone())),
                _ => None,
            })
            .collect();
        if files.is_empty() {
            return;
        }

        let sized: Vec<(String, Result<Bytes, std::io::Error>)> = stream::iter(files)
            .map(|(name, file)| async move {
                let content = self.content(&file).await;
                (name, content)
            })
            .buffer_unordered(self.options.lister_concurrency.max(1))
            .collect()
            .await;

        for (name, content) in sized {
            match content {
                Ok(content) => {
                    if let Some(entry) = listing.get_mut(&name) {
                        entry.attrs.size = content.len() as u64;
                    }
                }
                Err(e) => debug!(name, error = %e, "could not size generated file"),
            }
        }
    }

    async fn list_children(&self, node: &NodeId) -> Result<Listing, std::io::Error> {
        if let Some(fixed) = Self::fixed_children(node) {
            return Ok(fixed);
        }
        match node {
            NodeId::Root => Ok(self
                .options
                .projects
                .iter()
                .filter(|p| names::is_visible(p))
                .map(|p| {
                    (
                        p.clone(),
                        Entry::dir(NodeId::Project { project: p.clone() }),
                    )
                })
                .collect()),
            NodeId::Service { project, service } => match service {
                Service::Storage => self.list_buckets(project).await,
                Service::Bigquery => self.list_datasets(project).await,
                Service::Iam => self.list_accounts(project).await,
            },
            NodeId::ObjectDir { bucket, prefix } => self.list_object_dir(bucket, prefix).await,
            NodeId::ObjectDescriptors { bucket, prefix } => {
                self.list_object_descriptors(bucket, prefix).await
            }
            NodeId::Dataset { project, dataset } => self.list_dataset(project, dataset).await,
            NodeId::PolicyByRole(_)
            | NodeId::PolicyRole { .. }
            | NodeId::PolicyByMember(_)
            | NodeId::PolicyMember { .. } => self.list_policy_view(node).await,
            NodeId::Object { .. } | NodeId::File(_) => {
                Err(std::io::Error::from_raw_os_error(libc::ENOTDIR))
            }
            NodeId::Project { .. }
            | NodeId::StorageMeta { .. }
            | NodeId::DatasetMeta { .. }
            | NodeId::Table { .. }
            | NodeId::TableMeta { .. }
            | NodeId::ServiceAccount { .. }
            | NodeId::Policy(_) => Ok(Listing::new()),
        }
    }

    /// Resolve `name` inside `parent` to a child identity.
    async fn lookup(&self, parent: &NodeId, name: &str) -> Result<NodeId, std::io::Error> {
        if name != names::META && !names::is_visible(name) {
            trace!(name, "hidden name, not consulting the backend");
            return Err(enoent());
        }

        if let Some(mut fixed) = Self::fixed_children(parent) {
            return fixed.remove(name).map(|e| e.node).ok_or_else(enoent);
        }

        match parent {
            NodeId::ObjectDir { bucket, prefix } => {
                if name == names::META {
                    return Ok(NodeId::StorageMeta {
                        bucket: bucket.clone(),
                        prefix: prefix.clone(),
                    });
                }
                self.lookup_in_object_dir(bucket, prefix, name).await
            }
            NodeId::Dataset { project, dataset } => Ok(if name == names::META {
                NodeId::DatasetMeta {
                    project: project.clone(),
                    dataset: dataset.clone(),
                }
            } else {
                NodeId::Table {
                    project: project.clone(),
                    dataset: dataset.clone(),
                    table: name.to_owned(),
                }
            }),
            _ if name == names::META => Err(enoent()),
            NodeId::Root => Ok(NodeId::Project {
                project: name.to_owned(),
            }),
            NodeId::Service { project, service } => Ok(match service {
                Service::Storage => NodeId::ObjectDir {
                    bucket: name.to_owned(),
                    prefix: String::new(),
                },
                Service::Bigquery => NodeId::Dataset {
                    project: project.clone(),
                    dataset: name.to_owned(),
                },
                Service::Iam => NodeId::ServiceAccount {
                    project: project.clone(),
                    email: name.to_owned(),
                },
            }),
            NodeId::ObjectDescriptors { bucket, prefix } => {
                self.lookup_object_descriptor(bucket, prefix, name).await
            }
            NodeId::PolicyByRole(_)
            | NodeId::PolicyRole { .. }
            | NodeId::PolicyByMember(_)
            | NodeId::PolicyMember { .. } => self
                .list_policy_view(parent)
                .await?
                .remove(name)
                .map(|e| e.node)
                .ok_or_else(enoent),
            NodeId::Object { .. } | NodeId::File(_) => {
                Err(std::io::Error::from_raw_os_error(libc::ENOTDIR))
            }
            NodeId::Project { .. }
            | NodeId::StorageMeta { .. }
            | NodeId::DatasetMeta { .. }
            | NodeId::Table { .. }
            | NodeId::TableMeta { .. }
            | NodeId::ServiceAccount { .. }
            | NodeId::Policy(_) => Err(enoent()),
        }
    }

    /// Current attributes of `node`.
    async fn stat(&self, node: &NodeId) -> Result<Attrs, std::io::Error> {
        match node {
            NodeId::Object { bucket, name } => self.object_stat(bucket, name).await,
            NodeId::Table {
                project,
                dataset,
                table,
            } => {
                let rows = self
                    .fetch
                    .clone()
                    .row_count(project.clone(), dataset.clone(), table.clone())
                    .await?;
                Ok(Attrs::dir().with_size(rows))
            }
            NodeId::File(file) => Ok(Attrs::file(self.content(file).await?.len() as u64)),
            NodeId::ObjectDir { bucket, prefix } if prefix.is_empty() => {
                Ok(self.bucket_stat(bucket).await)
            }
            NodeId::Root
            | NodeId::Project { .. }
            | NodeId::Service { .. }
            | NodeId::ObjectDir { .. }
            | NodeId::StorageMeta { .. }
            | NodeId::ObjectDescriptors { .. }
            | NodeId::Dataset { .. }
            | NodeId::DatasetMeta { .. }
            | NodeId::TableMeta { .. }
            | NodeId::ServiceAccount { .. }
            | NodeId::Policy(_)
            | NodeId::PolicyByRole(_)
            | NodeId::PolicyRole { .. }
            | NodeId::PolicyByMember(_)
            | NodeId::PolicyMember { .. } => Ok(Attrs::dir()),
        }
    }

    /// The full content of a generated file.
    async fn content(&self, file: &VirtualFile) -> Result<Bytes, std::io::Error> {
        match file {
            VirtualFile::BucketDescriptor { bucket } => self.bucket_descriptor(bucket).await,
            VirtualFile::ObjectDescriptor { bucket, object } => {
                self.object_descriptor(bucket, object).await
            }
            VirtualFile::TableSchema {
                project,
                dataset,
                table,
            } => self.table_schema(project, dataset, table).await,
            VirtualFile::TableMetadata {
                project,
                dataset,
                table,
            } => self.table_metadata(project, dataset, table).await,
            VirtualFile::AccountDescriptor { project, email } => {
                Ok(self.fetch.clone().account(project.clone(), email.clone()).await?)
            }
            VirtualFile::AccountKeys { project, email } => {
                self.account_keys(project, email).await
            }
            VirtualFile::PolicyDocument(scope) => self.policy_document(scope).await,
            VirtualFile::RoleMember { .. } | VirtualFile::MemberRole { .. } => Ok(Bytes::new()),
        }
    }

    async fn open(&self, node: &NodeId) -> Result<NodeReader<B>, std::io::Error> {
        match node {
            NodeId::Object { bucket, name } => {
                let attrs = self.object_stat(bucket, name).await?;
                let source = ObjectSource::new(
                    Arc::clone(&self.fetch.backend),
                    self.fetch.cancel.clone(),
                    bucket.clone(),
                    name.clone(),
                );
                Ok(NodeReader::Object(ReadAheadBuffer::new(
                    source,
                    attrs.size,
                    self.options.read_ahead,
                )))
            }
            NodeId::File(file) => Ok(NodeReader::Virtual(self.content(file).await?)),
            _ => Err(std::io::Error::from_raw_os_error(libc::EISDIR)),
        }
    }
}

impl<B: CloudBackend> FsDataProvider for CloudTree<B> {
    type Reader = NodeReader<B>;

    #[instrument(name = "CloudTree::lookup", skip(self, parent), fields(parent = parent.addr))]
    async fn lookup(&self, parent: INode, name: &OsStr) -> Result<INode, std::io::Error> {
        let parent_id = self.resolve(parent.addr)?;
        let name = name.to_str().ok_or_else(enoent)?;
        let child = self.inner.lookup(&parent_id, name).await?;
        let attrs = self.inner.stat(&child).await?;
        let addr = self.inner.arena.intern(child);
        Ok(self.inner.inode(addr, attrs))
    }

    #[instrument(name = "CloudTree::getattr", skip(self, inode), fields(addr = inode.addr))]
    async fn getattr(&self, inode: INode) -> Result<INode, std::io::Error> {
        let node = self.resolve(inode.addr)?;
        let attrs = self.inner.stat(&node).await?;
        Ok(self.inner.inode(inode.addr, attrs))
    }

    #[instrument(name = "CloudTree::readdir", skip(self, parent), fields(parent = parent.addr))]
    async fn readdir(&self, parent: INode) -> Result<Vec<(OsString, INode)>, std::io::Error> {
        let node = self.resolve(parent.addr)?;
        let listing = self.inner.list(&node).await?;
        Ok(listing
            .into_iter()
            .map(|(name, entry)| {
                let addr = self.inner.arena.intern(entry.node);
                (OsString::from(name), self.inner.inode(addr, entry.attrs))
            })
            .collect())
    }

    #[instrument(name = "CloudTree::open", skip(self, inode), fields(addr = inode.addr))]
    async fn open(&self, inode: INode, flags: OpenFlags) -> Result<NodeReader<B>, std::io::Error> {
        if flags.is_write_intent() {
            return Err(errno::read_only());
        }
        let node = self.resolve(inode.addr)?;
        self.inner.open(&node).await
    }
}
