//! Attaching a [`CloudTree`] to a mountpoint and tearing it down again.
//!
//! fuser will not attempt a forced unmount when its `BackgroundSession` is dropped, only a
//! regular one, so [`MountHandle`] is aggressive about detaching the mountpoint when it goes away
//! without an explicit [`MountHandle::unmount`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{CloudBackend, LoggingBackend};
use crate::cache::metadata::{CacheOptions, InvalidCacheDirError, MetadataCache, ttl};
use crate::fs::async_fs::AsyncFs;
use crate::fs::fuser::FuserAdapter;
use crate::fs::readahead::DEFAULT_READ_AHEAD;
use crate::lister::DEFAULT_CONCURRENCY;
use crate::tree::{CloudTree, TreeOptions};

/// Errors raised while mounting or unmounting.
#[derive(Debug, Error)]
pub enum MountError {
    /// The mountpoint does not exist.
    #[error("mountpoint {0} does not exist")]
    MissingMountpoint(PathBuf),

    /// The mountpoint exists but is not a directory.
    #[error("mountpoint {0} is not a directory")]
    NotADirectory(PathBuf),

    /// The mountpoint could not be inspected.
    #[error("failed to inspect mountpoint: {0}")]
    Inspect(#[source] std::io::Error),

    /// The metadata cache directory is unusable.
    #[error("invalid cache directory: {0}")]
    Cache(#[from] InvalidCacheDirError),

    /// The kernel refused the mount.
    #[error("failed to mount: {0}")]
    Fuse(#[source] std::io::Error),

    /// The FUSE session thread could not be joined.
    #[error("failed to join the FUSE session: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything [`mount`] needs besides the mountpoint and the backend.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// The project shown at the mount root.
    pub project: String,
    /// Verbose logging was requested. Implies `log_backend_calls`.
    pub debug: bool,
    /// Mount read-only. The filesystem is read-only regardless; `false` is ignored.
    pub read_only: bool,
    /// Extra options passed to the kernel verbatim.
    pub raw_options: Vec<String>,
    /// Log every backend call with its latency.
    pub log_backend_calls: bool,
    /// Wipe the metadata cache before mounting.
    pub clear_cache: bool,
    /// Read-ahead window of each object handle, in bytes.
    pub read_ahead_size: u64,
    /// Let other users access the mount.
    pub allow_other: bool,
    /// Let the kernel enforce permission bits.
    pub default_permissions: bool,
    /// Owner reported for every node.
    pub uid: u32,
    /// Group reported for every node.
    pub gid: u32,
    /// Metadata cache directory.
    pub cache_dir: PathBuf,
    /// How long "not found" answers are remembered.
    pub negative_ttl: Duration,
    /// Bound on concurrent prefetch calls.
    pub lister_concurrency: usize,
}

impl MountOptions {
    /// Defaults for mounting `project`, caching under `cache_dir`.
    #[must_use]
    pub fn new(project: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            debug: false,
            read_only: true,
            raw_options: Vec::new(),
            log_backend_calls: false,
            clear_cache: false,
            read_ahead_size: DEFAULT_READ_AHEAD,
            allow_other: false,
            default_permissions: false,
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            cache_dir: cache_dir.into(),
            negative_ttl: ttl::NEGATIVE,
            lister_concurrency: DEFAULT_CONCURRENCY,
        }
    }

    fn logs_backend_calls(&self) -> bool {
        self.log_backend_calls || self.debug
    }

    fn fuse_options(&self) -> Vec<fuser::MountOption> {
        let mut opts = vec![
            fuser::MountOption::FSName("gcloud-fs".to_owned()),
            fuser::MountOption::Subtype("gcloud-fs".to_owned()),
            fuser::MountOption::RO,
            fuser::MountOption::NoDev,
            fuser::MountOption::NoSuid,
        ];
        if self.allow_other {
            opts.push(fuser::MountOption::AllowOther);
        }
        if self.default_permissions {
            opts.push(fuser::MountOption::DefaultPermissions);
        }
        opts.extend(
            self.raw_options
                .iter()
                .map(|raw| fuser::MountOption::CUSTOM(raw.clone())),
        );
        opts
    }
}

/// A live mount.
///
/// Dropping the handle without calling [`unmount`](Self::unmount) still detaches the
/// mountpoint, forcibly if need be.
pub struct MountHandle {
    session: Option<fuser::BackgroundSession>,
    mountpoint: PathBuf,
    cancel: CancellationToken,
    destroyed: CancellationToken,
}

impl MountHandle {
    /// Where the filesystem is mounted.
    #[must_use]
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Resolve once the kernel has torn the session down, e.g. after an external `umount`.
    pub async fn wait(&self) {
        self.destroyed.cancelled().await;
    }

    /// Abort in-flight backend calls, then unmount and wait for the session to finish.
    pub async fn unmount(mut self) -> Result<(), MountError> {
        info!(mountpoint = %self.mountpoint.display(), "unmounting");
        self.cancel.cancel();
        if let Some(session) = self.session.take() {
            // Joining blocks until the kernel releases the session.
            tokio::task::spawn_blocking(move || session.join()).await?;
        }
        debug!(mountpoint = %self.mountpoint.display(), "unmounted");
        Ok(())
    }

    fn force_detach(&self) {
        const UMOUNT_ATTEMPT_COUNT: usize = 10;
        const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

        debug!(mountpoint = ?self.mountpoint, "confirming unmount of FUSE filesystem...");

        for i in 0..UMOUNT_ATTEMPT_COUNT {
            let result = {
                #[cfg(target_os = "macos")]
                {
                    nix::mount::unmount(&self.mountpoint, nix::mount::MntFlags::MNT_FORCE)
                }

                #[cfg(target_os = "linux")]
                {
                    nix::mount::umount2(&self.mountpoint, nix::mount::MntFlags::MNT_DETACH)
                }
            };

            match result {
                Ok(()) => {
                    debug!(attempt = i + 1, "unmounted FUSE filesystem");
                    break;
                }
                Err(Errno::EBUSY) => {
                    debug!(attempt = i + 1, "FUSE filesystem still busy, retrying...");
                    std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                }
                Err(Errno::EINVAL | Errno::ENOENT) => {
                    debug!(attempt = i + 1, "FUSE filesystem already unmounted");
                    break;
                }
                Err(e) => {
                    error!(attempt = i + 1, error = %e, "failed to unmount FUSE filesystem");
                    break;
                }
            }
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(session) = self.session.take() {
            drop(session);
            self.force_detach();
        }
    }
}

/// Mount the cloud tree for `options.project` at `mountpoint`.
///
/// Must be called from within a tokio runtime; FUSE requests are served on it.
pub async fn mount<B: CloudBackend>(
    mountpoint: &Path,
    backend: B,
    options: MountOptions,
) -> Result<MountHandle, MountError> {
    match tokio::fs::metadata(mountpoint).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(MountError::NotADirectory(mountpoint.to_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MountError::MissingMountpoint(mountpoint.to_owned()));
        }
        Err(e) => return Err(MountError::Inspect(e)),
    }

    if !options.read_only {
        warn!("read-write mounts are not supported, mounting read-only");
    }

    let cache = MetadataCache::open(
        &options.cache_dir,
        CacheOptions {
            negative_ttl: options.negative_ttl,
            clear_on_start: options.clear_cache,
        },
    )
    .await?;
    debug!(cache = %cache.root().display(), "metadata cache ready");

    let backend = Arc::new(LoggingBackend::new(backend, options.logs_backend_calls()));
    let cancel = CancellationToken::new();
    let tree = CloudTree::new(
        backend,
        Arc::new(cache),
        TreeOptions {
            projects: vec![options.project.clone()],
            uid: options.uid,
            gid: options.gid,
            read_ahead: options.read_ahead_size,
            lister_concurrency: options.lister_concurrency,
        },
        cancel.clone(),
    );
    let root = tree.root_inode();

    let destroyed = CancellationToken::new();
    let adapter = FuserAdapter::new(
        AsyncFs::new(tree, root),
        tokio::runtime::Handle::current(),
        destroyed.clone(),
    );

    let session = fuser::spawn_mount2(adapter, mountpoint, &options.fuse_options())
        .map_err(MountError::Fuse)?;
    info!(
        mountpoint = %mountpoint.display(),
        project = %options.project,
        "filesystem mounted"
    );

    Ok(MountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_owned(),
        cancel,
        destroyed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_options_always_read_only() {
        let mut options = MountOptions::new("p1", "/tmp/cache");
        options.read_only = false;
        options.allow_other = true;
        options.raw_options = vec!["max_read=131072".to_owned()];

        let opts = options.fuse_options();
        assert!(opts.contains(&fuser::MountOption::RO));
        assert!(opts.contains(&fuser::MountOption::AllowOther));
        assert!(!opts.contains(&fuser::MountOption::DefaultPermissions));
        assert!(opts.contains(&fuser::MountOption::CUSTOM("max_read=131072".to_owned())));
        assert!(opts.contains(&fuser::MountOption::FSName("gcloud-fs".to_owned())));
    }

    #[test]
    fn debug_turns_on_backend_call_logging() {
        let mut options = MountOptions::new("p1", "/tmp/cache");
        assert!(!options.logs_backend_calls());

        options.debug = true;
        assert!(options.logs_backend_calls());

        options.debug = false;
        options.log_backend_calls = true;
        assert!(options.logs_backend_calls());
    }

    #[tokio::test]
    async fn refuses_a_missing_mountpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        let err = mount(&missing, NeverBackend, MountOptions::new("p1", dir.path().join("c")))
            .await
            .err()
            .expect("mount must fail");
        assert!(matches!(err, MountError::MissingMountpoint(p) if p == missing));
    }

    #[tokio::test]
    async fn refuses_a_file_mountpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").expect("write");
        let err = mount(&file, NeverBackend, MountOptions::new("p1", dir.path().join("c")))
            .await
            .err()
            .expect("mount must fail");
        assert!(matches!(err, MountError::NotADirectory(_)));
    }

    /// A backend for tests that never get as far as a backend call.
    struct NeverBackend;

    macro_rules! never {
        ($($name:ident($($arg:ident: $ty:ty),*) -> $out:ty;)*) => {
            $(async fn $name(&self, $($arg: $ty),*) -> Result<$out, crate::backend::BackendError> {
                $(let _ = $arg;)*
                Err(crate::backend::BackendError::Cancelled)
            })*
        };
    }

    impl CloudBackend for NeverBackend {
        never! {
            list_buckets(project: &str) -> Vec<crate::backend::Bucket>;
            get_bucket(bucket: &str) -> crate::backend::Bucket;
            list_objects(bucket: &str, prefix: &str, delimiter: &str) -> crate::backend::ObjectListing;
            get_object_attributes(bucket: &str, object: &str) -> crate::backend::ObjectAttributes;
            read_object_range(bucket: &str, object: &str, offset: u64, len: u64) -> bytes::Bytes;
            list_datasets(project: &str) -> Vec<crate::backend::Dataset>;
            list_tables(project: &str, dataset: &str) -> Vec<crate::backend::TableRef>;
            describe_table(project: &str, dataset: &str, table: &str) -> crate::backend::TableDescription;
            list_service_accounts(project: &str) -> Vec<crate::backend::ServiceAccount>;
            get_service_account(project: &str, email: &str) -> crate::backend::ServiceAccount;
            list_service_account_keys(project: &str, email: &str) -> Vec<crate::backend::ServiceAccountKey>;
            fetch_bucket_policy(bucket: &str) -> crate::backend::Policy;
            fetch_dataset_policy(project: &str, dataset: &str) -> crate::backend::Policy;
            fetch_table_policy(project: &str, dataset: &str, table: &str) -> crate::backend::Policy;
        }
    }
}
