//! Filesystem plumbing shared by every node kind.
/// Stable inode numbering for lazily materialized nodes.
pub mod arena;
/// Async inode table and data-provider traits.
pub mod async_fs;
/// Backend/cache error to errno translation.
pub mod errno;
/// FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`async_fs::AsyncFs`].
pub mod fuser;
/// Per-handle read-ahead buffering.
pub mod readahead;

use std::ffi::OsStr;
use std::time::SystemTime;

use bitflags::bitflags;

/// Type representing an inode identifier.
pub type InodeAddr = u64;

/// Type representing a file handle.
pub type FileHandle = u64;

bitflags! {
    /// Permission bits for an inode, similar to Unix file permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InodePerms: u16 {
        /// Other: execute permission.
        const OTHER_EXECUTE = 1 << 0;
        /// Other: write permission.
        const OTHER_WRITE   = 1 << 1;
        /// Other: read permission.
        const OTHER_READ    = 1 << 2;

        /// Group: execute permission.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: write permission.
        const GROUP_WRITE   = 1 << 4;
        /// Group: read permission.
        const GROUP_READ    = 1 << 5;

        /// Owner: execute permission.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: write permission.
        const OWNER_WRITE   = 1 << 7;
        /// Owner: read permission.
        const OWNER_READ    = 1 << 8;

        /// Read and traverse for everyone: `r-xr-xr-x`.
        const READ_ONLY_DIR = Self::OWNER_READ.bits()
            | Self::OWNER_EXECUTE.bits()
            | Self::GROUP_READ.bits()
            | Self::GROUP_EXECUTE.bits()
            | Self::OTHER_READ.bits()
            | Self::OTHER_EXECUTE.bits();
        /// Read for everyone: `r--r--r--`.
        const READ_ONLY_FILE = Self::OWNER_READ.bits()
            | Self::GROUP_READ.bits()
            | Self::OTHER_READ.bits();
    }
}

bitflags! {
    /// Flags for opening a file, similar to Unix open(2) flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        /// Open for reading only.
        const RDONLY = libc::O_RDONLY;
        /// Open for writing only.
        const WRONLY = libc::O_WRONLY;
        /// Open for reading and writing.
        const RDWR = libc::O_RDWR;

        /// Append on each write.
        const APPEND = libc::O_APPEND;
        /// Truncate to zero length.
        const TRUNC = libc::O_TRUNC;
        /// Create file if it does not exist.
        const CREAT = libc::O_CREAT;
        /// Error if file already exists (with `CREAT`).
        const EXCL = libc::O_EXCL;

        /// Non-blocking mode.
        const NONBLOCK = libc::O_NONBLOCK;
        /// Do not follow symlinks.
        const NOFOLLOW = libc::O_NOFOLLOW;
        /// Set close-on-exec.
        const CLOEXEC = libc::O_CLOEXEC;
        /// Fail if not a directory.
        const DIRECTORY = libc::O_DIRECTORY;
    }
}

impl OpenFlags {
    /// Flags that express an intent to modify the file.
    pub const WRITE_INTENT: Self = Self::WRONLY
        .union(Self::RDWR)
        .union(Self::APPEND)
        .union(Self::TRUNC)
        .union(Self::CREAT);

    /// Whether opening with these flags could modify the file.
    #[must_use]
    pub fn is_write_intent(self) -> bool {
        self.intersects(Self::WRITE_INTENT)
    }
}

bitflags! {
    /// Flags returned to the kernel in an open reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileOpenOptions: u32 {
        /// Bypass the page cache for this file.
        const DIRECT_IO = 1 << 0;
        /// Allow the kernel to keep previously cached data for this file.
        const KEEP_CACHE = 1 << 1;
    }
}

/// The type of an inode entry in the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum INodeType {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// Representation of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct INode {
    /// The address of this inode, which serves as its unique identifier.
    pub addr: InodeAddr,
    /// The permissions associated with this inode, represented as a bitfield.
    pub permissions: InodePerms,
    /// The user ID of the owner of this inode.
    pub uid: u32,
    /// The group ID of the owner of this inode.
    pub gid: u32,
    /// The time this inode was created at.
    pub create_time: SystemTime,
    /// The time this inode was last modified at.
    pub last_modified_at: SystemTime,
    /// The size of the file represented by this inode, in bytes. For directories this is a
    /// synthetic figure (e.g. a row count) or zero.
    pub size: u64,
    /// Additional information about the type of this inode (e.g., file vs directory).
    pub itype: INodeType,
}

impl INode {
    /// Link count reported to the kernel.
    #[must_use]
    pub fn nlink(&self) -> u32 {
        match self.itype {
            INodeType::Directory => 2,
            INodeType::File => 1,
        }
    }
}

/// A directory entry yielded by [`async_fs::AsyncFs::readdir`].
#[derive(Debug, Clone, Copy)]
pub struct DirEntry<'a> {
    /// The name of this entry within its parent directory.
    pub name: &'a OsStr,
    /// The full inode data for this entry.
    pub inode: INode,
}

/// Filesystem statistics returned by [`async_fs::AsyncFs::statfs`].
///
/// Block-related sizes are in units of `block_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsyncFsStats {
    /// Filesystem block size (bytes).
    pub block_size: u32,
    /// Total number of data blocks.
    pub total_blocks: u64,
    /// Number of free blocks.
    pub free_blocks: u64,
    /// Number of blocks available to unprivileged users.
    pub available_blocks: u64,
    /// Total number of file nodes (inodes).
    pub total_inodes: u64,
    /// Number of free file nodes.
    pub free_inodes: u64,
    /// Maximum filename length (bytes).
    pub max_filename_length: u32,
}
