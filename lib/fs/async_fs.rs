//! Async `INode` table which supports concurrent access, fronting a [`FsDataProvider`].
//!
//! The table only remembers the attributes most recently reported for each address. Freshness
//! is the provider's business: every lookup, getattr and readdir goes to the provider, which in
//! turn is expected to answer cheaply from its own (TTL-bounded) caches.

use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tracing::{instrument, warn};

use crate::fs::{AsyncFsStats, DirEntry, FileHandle, INode, INodeType, InodeAddr, OpenFlags};

/// A reader for an open file, returned by [`FsDataProvider::open`].
///
/// Implementors provide the actual data for read operations. The FUSE
/// adapter calls [`close`](Self::close) to release resources explicitly.
pub trait FileReader: Send + Sync + 'static {
    /// Read up to `size` bytes starting at byte `offset`.
    fn read(
        &self,
        offset: u64,
        size: u32,
    ) -> impl Future<Output = Result<Bytes, std::io::Error>> + Send;

    /// Release any resources held by this reader.
    ///
    /// Called explicitly by the FUSE adapter during `release`. The default
    /// implementation is a no-op.
    fn close(&self) -> impl Future<Output = Result<(), std::io::Error>> + Send {
        async { Ok(()) }
    }
}

/// A data provider for [`AsyncFs`] that resolves names, attributes and content.
pub trait FsDataProvider: Clone + Send + Sync + 'static {
    /// The reader type returned by [`open`](Self::open).
    type Reader: FileReader;

    /// Look up a child inode by name within the given parent directory.
    fn lookup(
        &self,
        parent: INode,
        name: &OsStr,
    ) -> impl Future<Output = Result<INode, std::io::Error>> + Send;

    /// Report up-to-date attributes for an inode that was previously handed out.
    fn getattr(&self, inode: INode)
    -> impl Future<Output = Result<INode, std::io::Error>> + Send;

    /// List all children of a directory.
    ///
    /// The result must be sorted by name and free of duplicates; [`AsyncFs::readdir`] pages
    /// through it by index.
    fn readdir(
        &self,
        parent: INode,
    ) -> impl Future<Output = Result<Vec<(OsString, INode)>, std::io::Error>> + Send;

    /// Open a file and return a reader for subsequent read calls.
    fn open(
        &self,
        inode: INode,
        flags: OpenFlags,
    ) -> impl Future<Output = Result<Self::Reader, std::io::Error>> + Send;
}

/// An open file that provides read access.
///
/// Returned by [`AsyncFs::open`]. The caller owns this handle and uses
/// [`read`](Self::read) to fetch data.
#[derive(Debug, Clone)]
pub struct OpenFile<R> {
    /// The raw file handle number, suitable for returning to the FUSE kernel.
    pub fh: FileHandle,
    /// The reader backing this open file.
    pub reader: Arc<R>,
}

impl<R: FileReader> OpenFile<R> {
    /// Read up to `size` bytes starting at byte `offset`.
    pub async fn read(&self, offset: u64, size: u32) -> Result<Bytes, std::io::Error> {
        self.reader.read(offset, size).await
    }
}

/// An asynchronous filesystem mapping `InodeAddr` to `INode`.
pub struct AsyncFs<DP: FsDataProvider> {
    /// Canonical addr -> `INode` map, holding the last attributes reported by the provider.
    inode_table: scc::HashMap<InodeAddr, INode>,

    /// The data provider used to resolve everything the table does not know.
    data_provider: DP,

    /// Monotonically increasing file handle counter. Starts at 1 (0 is reserved).
    next_fh: AtomicU64,
}

impl<DP: FsDataProvider> AsyncFs<DP> {
    /// Create a new `AsyncFs`, seeding the root inode into the table.
    pub fn new(data_provider: DP, root: INode) -> Self {
        let inode_table = scc::HashMap::new();
        let _ = inode_table.insert_sync(root.addr, root);
        Self {
            inode_table,
            data_provider,
            next_fh: AtomicU64::new(1),
        }
    }

    /// Get the total number of inodes currently stored in the inode table.
    #[must_use]
    pub fn inode_count(&self) -> usize {
        self.inode_table.len()
    }

    /// Return filesystem statistics.
    ///
    /// Reports the current inode count. Block-related fields default to
    /// values appropriate for a virtual read-only filesystem (4 KiB
    /// blocks, no free space).
    #[must_use]
    pub fn statfs(&self) -> AsyncFsStats {
        AsyncFsStats {
            block_size: 4096,
            total_blocks: 0,
            free_blocks: 0,
            available_blocks: 0,
            total_inodes: self.inode_count() as u64,
            free_inodes: 0,
            max_filename_length: 255,
        }
    }

    /// Retrieve an inode the kernel is expected to already know about.
    pub async fn loaded_inode(&self, addr: InodeAddr) -> Result<INode, std::io::Error> {
        self.inode_table
            .read_async(&addr, |_, inode| *inode)
            .await
            .ok_or_else(|| {
                warn!(addr, "inode not found in table");
                std::io::Error::from_raw_os_error(libc::ENOENT)
            })
    }

    async fn remember(&self, inode: INode) {
        self.inode_table.upsert_async(inode.addr, inode).await;
    }

    /// Look up `name` within the directory at `parent`.
    #[instrument(name = "AsyncFs::lookup", skip(self))]
    pub async fn lookup(&self, parent: InodeAddr, name: &OsStr) -> Result<INode, std::io::Error> {
        let parent_ino = self.loaded_inode(parent).await?;
        if parent_ino.itype != INodeType::Directory {
            return Err(std::io::Error::from_raw_os_error(libc::ENOTDIR));
        }

        let child = self.data_provider.lookup(parent_ino, name).await?;
        self.remember(child).await;
        Ok(child)
    }

    /// Return the attributes of the inode at `addr`.
    ///
    /// This is the getattr entry point for the filesystem. Callers at the FUSE boundary are
    /// responsible for converting to `fuser::FileAttr`.
    #[instrument(name = "AsyncFs::getattr", skip(self))]
    pub async fn getattr(&self, addr: InodeAddr) -> Result<INode, std::io::Error> {
        let known = self.loaded_inode(addr).await?;
        let fresh = self.data_provider.getattr(known).await?;
        if fresh != known {
            self.remember(fresh).await;
        }
        Ok(fresh)
    }

    /// Open a file for reading.
    ///
    /// Validates the inode is not a directory, delegates to the data provider
    /// to create a [`FileReader`], and returns an [`OpenFile`] that the caller
    /// owns.
    #[instrument(name = "AsyncFs::open", skip(self))]
    pub async fn open(
        &self,
        addr: InodeAddr,
        flags: OpenFlags,
    ) -> Result<OpenFile<DP::Reader>, std::io::Error> {
        let inode = self.loaded_inode(addr).await?;
        if inode.itype == INodeType::Directory {
            return Err(std::io::Error::from_raw_os_error(libc::EISDIR));
        }
        let reader = self.data_provider.open(inode, flags).await?;
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        Ok(OpenFile {
            fh,
            reader: Arc::new(reader),
        })
    }

    /// Iterate directory entries for `parent`, starting from `offset`.
    ///
    /// Entries are yielded in the provider's (name-sorted) order. For each
    /// entry, `filler` is called with the [`DirEntry`] and the next offset
    /// value. If `filler` returns `true` (indicating the caller's buffer is
    /// full), iteration stops early.
    #[instrument(name = "AsyncFs::readdir", skip(self, filler))]
    pub async fn readdir(
        &self,
        parent: InodeAddr,
        offset: u64,
        mut filler: impl FnMut(DirEntry<'_>, u64) -> bool,
    ) -> Result<(), std::io::Error> {
        let parent_inode = self.loaded_inode(parent).await?;
        if parent_inode.itype != INodeType::Directory {
            return Err(std::io::Error::from_raw_os_error(libc::ENOTDIR));
        }

        let children = self.data_provider.readdir(parent_inode).await?;

        #[expect(
            clippy::cast_possible_truncation,
            reason = "offset fits in usize on supported 64-bit platforms"
        )]
        let skip = offset as usize;

        for (i, (name, inode)) in children.iter().enumerate().skip(skip) {
            self.remember(*inode).await;
            let next_offset = (i + 1) as u64;
            if filler(DirEntry { name, inode: *inode }, next_offset) {
                break;
            }
        }

        Ok(())
    }
}
