//! FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`AsyncFs`](super::async_fs::AsyncFs).
//!
//! Every read-side callback is dispatched onto the tokio runtime so that a slow backend call
//! never blocks the FUSE session thread. Mutating callbacks are answered inline with `EROFS`.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use super::async_fs::{AsyncFs, FileReader as _, FsDataProvider};
use super::{FileHandle, FileOpenOptions, INode, INodeType, OpenFlags};

/// Convert an I/O error to the corresponding errno value for FUSE replies.
#[expect(
    clippy::wildcard_enum_match_arm,
    reason = "ErrorKind is non_exhaustive; EIO is the safe default"
)]
fn io_to_errno(e: &std::io::Error) -> i32 {
    e.raw_os_error().unwrap_or_else(|| match e.kind() {
        std::io::ErrorKind::NotFound => libc::ENOENT,
        std::io::ErrorKind::PermissionDenied => libc::EACCES,
        std::io::ErrorKind::ReadOnlyFilesystem => libc::EROFS,
        _ => libc::EIO,
    })
}

/// Trait abstracting the `.error(errno)` method common to all fuser reply types.
trait FuseReply {
    fn error(self, errno: i32);
}

macro_rules! impl_fuse_reply {
    ($($ty:ty),* $(,)?) => {
        $(impl FuseReply for $ty {
            fn error(self, errno: i32) {
                // Calls the inherent fuser method (not this trait method).
                self.error(errno);
            }
        })*
    };
}

impl_fuse_reply!(
    fuser::ReplyEntry,
    fuser::ReplyAttr,
    fuser::ReplyDirectory,
    fuser::ReplyOpen,
    fuser::ReplyData,
    fuser::ReplyEmpty,
    fuser::ReplyWrite,
    fuser::ReplyCreate,
);

/// Extension trait on `Result<T, std::io::Error>` for FUSE reply handling.
///
/// Centralizes the error-logging + errno-reply path so each FUSE callback
/// only has to express its success path.
trait FuseResultExt<T> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R));
}

impl<T> FuseResultExt<T> for Result<T, std::io::Error> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R)) {
        match self {
            Ok(val) => on_ok(val, reply),
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(io_to_errno(&e));
            }
        }
    }
}

/// Reject a mutating request.
fn refuse<R: FuseReply>(op: &'static str, reply: R) {
    debug!(op, "rejecting write on read-only filesystem");
    reply.error(libc::EROFS);
}

/// Convert an `INode` to the fuser-specific `FileAttr`.
fn inode_to_fuser_attr(inode: &INode, block_size: u32) -> fuser::FileAttr {
    fuser::FileAttr {
        ino: inode.addr,
        size: inode.size,
        blocks: inode.size.div_ceil(512),
        atime: inode.last_modified_at,
        mtime: inode.last_modified_at,
        ctime: inode.last_modified_at,
        crtime: inode.create_time,
        kind: inode_type_to_fuser(inode.itype),
        perm: inode.permissions.bits(),
        nlink: inode.nlink(),
        uid: inode.uid,
        gid: inode.gid,
        rdev: 0,
        blksize: block_size,
        flags: 0,
    }
}

fn inode_type_to_fuser(itype: INodeType) -> fuser::FileType {
    match itype {
        INodeType::Directory => fuser::FileType::Directory,
        INodeType::File => fuser::FileType::RegularFile,
    }
}

const BLOCK_SIZE: u32 = 4096;

/// State shared between the adapter and its spawned request tasks.
struct Shared<DP: FsDataProvider> {
    fs: AsyncFs<DP>,
    open_files: scc::HashMap<FileHandle, Arc<DP::Reader>>,
}

/// Bridges a generic [`FsDataProvider`] to the [`fuser::Filesystem`] trait.
pub struct FuserAdapter<DP: FsDataProvider> {
    shared: Arc<Shared<DP>>,
    runtime: tokio::runtime::Handle,
    destroyed: CancellationToken,
}

impl<DP: FsDataProvider> FuserAdapter<DP> {
    /// How long the kernel may cache entries and attributes before asking again.
    pub const ATTR_TTL: Duration = Duration::from_secs(60);

    /// Create a new adapter serving `fs`.
    ///
    /// `destroyed` is cancelled once the kernel tears the session down, whoever initiated it.
    pub fn new(
        fs: AsyncFs<DP>,
        runtime: tokio::runtime::Handle,
        destroyed: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                fs,
                open_files: scc::HashMap::new(),
            }),
            runtime,
            destroyed,
        }
    }
}

impl<DP: FsDataProvider> fuser::Filesystem for FuserAdapter<DP> {
    fn destroy(&mut self) {
        debug!("session destroyed");
        self.destroyed.cancel();
    }

    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let shared = Arc::clone(&self.shared);
        let name = name.to_owned();
        self.runtime.spawn(async move {
            shared
                .fs
                .lookup(parent, &name)
                .await
                .fuse_reply(reply, |inode, reply| {
                    let f_attr = inode_to_fuser_attr(&inode, BLOCK_SIZE);
                    debug!(?f_attr, "replying...");
                    reply.entry(&Self::ATTR_TTL, &f_attr, 0);
                });
        });
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            shared
                .fs
                .getattr(ino)
                .await
                .fuse_reply(reply, |inode, reply| {
                    let attr = inode_to_fuser_attr(&inode, BLOCK_SIZE);
                    debug!(?attr, "replying...");
                    reply.attr(&Self::ATTR_TTL, &attr);
                });
        });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _fh, offset, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let mut overflow = false;
            let result = shared
                .fs
                .readdir(ino, offset.cast_unsigned(), |de, next_offset| {
                    let Ok(idx) = i64::try_from(next_offset) else {
                        error!(next_offset, "directory entry index too large for fuser");
                        overflow = true;
                        return true;
                    };
                    debug!(name = ?de.name, ino = de.inode.addr, "adding entry to reply...");
                    let full = reply.add(
                        de.inode.addr,
                        idx,
                        inode_type_to_fuser(de.inode.itype),
                        de.name,
                    );
                    if full {
                        debug!("buffer full for now, stopping readdir");
                    }
                    full
                })
                .await;

            if overflow {
                reply.error(libc::EIO);
                return;
            }
            result.fuse_reply(reply, |(), reply| {
                debug!("finalizing reply...");
                reply.ok();
            });
        });
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, flags, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let flags = OpenFlags::from_bits_truncate(flags);
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let result = async {
                let open_file = shared.fs.open(ino, flags).await?;
                let fh = open_file.fh;
                shared
                    .open_files
                    .upsert_async(fh, Arc::clone(&open_file.reader))
                    .await;
                Ok::<_, std::io::Error>(fh)
            }
            .await;
            result.fuse_reply(reply, |fh, reply| {
                debug!(handle = fh, "replying...");
                reply.opened(fh, FileOpenOptions::KEEP_CACHE.bits());
            });
        });
    }

    #[instrument(
        name = "FuserAdapter::read",
        skip(self, _req, _ino, fh, offset, size, _flags, _lock_owner, reply)
    )]
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let result = async {
                let reader = shared
                    .open_files
                    .read_async(&fh, |_, reader| Arc::clone(reader))
                    .await
                    .ok_or_else(|| std::io::Error::from_raw_os_error(libc::EBADF))?;
                reader.read(offset.cast_unsigned(), size).await
            }
            .await;
            result.fuse_reply(reply, |data, reply| {
                debug!(read_bytes = data.len(), "replying...");
                reply.data(&data);
            });
        });
    }

    #[instrument(
        name = "FuserAdapter::release",
        skip(self, _req, _ino, fh, _flags, _lock_owner, _flush, reply)
    )]
    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let Some((_, reader)) = shared.open_files.remove_async(&fh).await else {
                debug!("file handle not open, replying error");
                reply.error(libc::EBADF);
                return;
            };
            if let Err(e) = reader.close().await {
                debug!(error = %e, "reader close reported error");
            }
            debug!("replying ok");
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::statfs", skip(self, _req, _ino, reply))]
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let stats = self.shared.fs.statfs();
        debug!(?stats, "replying...");
        reply.statfs(
            stats.total_blocks,
            stats.free_blocks,
            stats.available_blocks,
            stats.total_inodes,
            stats.free_inodes,
            stats.block_size,
            stats.max_filename_length,
            0,
        );
    }

    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        refuse("setattr", reply);
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        refuse("mknod", reply);
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        refuse("mkdir", reply);
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        refuse("unlink", reply);
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        refuse("rmdir", reply);
    }

    fn symlink(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: fuser::ReplyEntry,
    ) {
        refuse("symlink", reply);
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        refuse("rename", reply);
    }

    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        refuse("link", reply);
    }

    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        refuse("write", reply);
    }

    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        refuse("create", reply);
    }

    fn setxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: fuser::ReplyEmpty,
    ) {
        refuse("setxattr", reply);
    }

    fn removexattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        refuse("removexattr", reply);
    }

    fn fallocate(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _length: i64,
        _mode: i32,
        reply: fuser::ReplyEmpty,
    ) {
        refuse("fallocate", reply);
    }
}
