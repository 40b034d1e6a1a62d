#![allow(missing_docs, clippy::unwrap_used)]

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use bytes::Bytes;

use gcloud_fs::fs::async_fs::{FileReader, FsDataProvider};
use gcloud_fs::fs::{INode, INodeType, InodePerms, OpenFlags};

/// Builds an `INode` with sensible defaults. Only `addr` and `itype` are required.
pub fn make_inode(addr: u64, itype: INodeType, size: u64) -> INode {
    INode {
        addr,
        permissions: match itype {
            INodeType::Directory => InodePerms::READ_ONLY_DIR,
            _ => InodePerms::READ_ONLY_FILE,
        },
        uid: 1000,
        gid: 1000,
        create_time: SystemTime::UNIX_EPOCH,
        last_modified_at: SystemTime::UNIX_EPOCH,
        size,
        itype,
    }
}

/// A mock `FileReader` that returns a fixed byte slice for any read.
#[derive(Debug, Clone)]
pub struct MockFileReader {
    pub data: Bytes,
}

impl FileReader for MockFileReader {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "test mock, offsets stay small"
    )]
    async fn read(&self, offset: u64, size: u32) -> Result<Bytes, std::io::Error> {
        let start = (offset as usize).min(self.data.len());
        let end = (start + size as usize).min(self.data.len());
        Ok(self.data.slice(start..end))
    }
}

/// Shared state backing `MockFsDataProvider`.
#[derive(Debug, Default)]
pub struct MockFsState {
    /// `(parent_addr, child_name) -> child_inode`
    pub lookups: HashMap<(u64, OsString), INode>,
    /// `parent_addr -> vec of (child_name, child_inode)`, already sorted by name.
    pub directories: HashMap<u64, Vec<(OsString, INode)>>,
    /// `inode_addr -> file content bytes`
    pub file_contents: HashMap<u64, Bytes>,
    /// Attributes reported by `getattr`, overriding whatever the table holds.
    pub fresh_attrs: scc::HashMap<u64, INode>,
    /// Number of `readdir` calls that reached the provider.
    pub readdir_calls: AtomicUsize,
}

/// A clonable mock data provider for `AsyncFs` tests.
#[derive(Debug, Clone)]
pub struct MockFsDataProvider {
    pub state: Arc<MockFsState>,
}

impl MockFsDataProvider {
    pub fn new(state: MockFsState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }
}

impl FsDataProvider for MockFsDataProvider {
    type Reader = MockFileReader;

    async fn lookup(&self, parent: INode, name: &OsStr) -> Result<INode, std::io::Error> {
        self.state
            .lookups
            .get(&(parent.addr, name.to_os_string()))
            .copied()
            .ok_or_else(|| std::io::Error::from_raw_os_error(libc::ENOENT))
    }

    async fn getattr(&self, inode: INode) -> Result<INode, std::io::Error> {
        Ok(self
            .state
            .fresh_attrs
            .read_async(&inode.addr, |_, fresh| *fresh)
            .await
            .unwrap_or(inode))
    }

    async fn readdir(&self, parent: INode) -> Result<Vec<(OsString, INode)>, std::io::Error> {
        self.state.readdir_calls.fetch_add(1, Ordering::Relaxed);
        self.state
            .directories
            .get(&parent.addr)
            .cloned()
            .ok_or_else(|| std::io::Error::from_raw_os_error(libc::ENOENT))
    }

    async fn open(&self, inode: INode, flags: OpenFlags) -> Result<MockFileReader, std::io::Error> {
        if flags.is_write_intent() {
            return Err(std::io::Error::from_raw_os_error(libc::EROFS));
        }
        let data = self
            .state
            .file_contents
            .get(&inode.addr)
            .cloned()
            .unwrap_or_default();
        Ok(MockFileReader { data })
    }
}
