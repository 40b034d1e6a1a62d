//! Preflight checks run before `gcloud-fs mount` asks the kernel for a FUSE session.
//!
//! A mount needs the FUSE character device, opened read-write by the mounting user, and, for
//! unprivileged users, a setuid `fusermount` helper to perform the actual `mount(2)`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Where the kernel exposes FUSE.
const FUSE_DEVICE: &str = "/dev/fuse";

/// Mount helpers, preferred first.
const MOUNT_HELPERS: [&str; 2] = ["fusermount3", "fusermount"];

/// A missing prerequisite for mounting.
#[derive(Debug, thiserror::Error)]
pub enum FuseCheckError {
    /// The kernel module is not loaded.
    #[error("{} is missing: load the fuse kernel module (`modprobe fuse`) and retry", .0.display())]
    NoDevice(PathBuf),

    /// The device path could not be inspected.
    #[error("cannot inspect {}: {source}", .path.display())]
    Inspect {
        /// The device path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Something other than a character device sits at the device path.
    #[error("{} exists but is not the FUSE character device", .0.display())]
    NotADevice(PathBuf),

    /// The current user cannot open the device.
    #[error("cannot open {} for reading and writing: {source}", .path.display())]
    DeviceDenied {
        /// The device path.
        path: PathBuf,
        /// Why `access(2)` refused.
        #[source]
        source: nix::Error,
    },

    /// No helper can perform an unprivileged mount.
    #[error(
        "neither fusermount3 nor fusermount is on PATH; install the fuse3 package \
         or run gcloud-fs as root"
    )]
    NoMountHelper,
}

/// Verify that this process can mount a FUSE filesystem.
#[cfg(target_os = "linux")]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    check(
        Path::new(FUSE_DEVICE),
        &search_path,
        nix::unistd::geteuid().is_root(),
    )
}

/// Verify that this process can mount a FUSE filesystem.
///
/// Only Linux prerequisites are known; elsewhere the mount itself reports what is missing.
#[cfg(not(target_os = "linux"))]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    Ok(())
}

#[cfg_attr(not(target_os = "linux"), expect(dead_code))]
fn check(device: &Path, search_path: &OsStr, privileged: bool) -> Result<(), FuseCheckError> {
    use std::os::unix::fs::FileTypeExt as _;

    let meta = match std::fs::metadata(device) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FuseCheckError::NoDevice(device.to_owned()));
        }
        Err(source) => {
            return Err(FuseCheckError::Inspect {
                path: device.to_owned(),
                source,
            });
        }
    };
    if !meta.file_type().is_char_device() {
        return Err(FuseCheckError::NotADevice(device.to_owned()));
    }

    nix::unistd::access(
        device,
        nix::unistd::AccessFlags::R_OK | nix::unistd::AccessFlags::W_OK,
    )
    .map_err(|source| FuseCheckError::DeviceDenied {
        path: device.to_owned(),
        source,
    })?;

    if !privileged && mount_helper(search_path).is_none() {
        return Err(FuseCheckError::NoMountHelper);
    }
    Ok(())
}

/// The first mount helper found along `search_path`.
#[cfg_attr(not(target_os = "linux"), expect(dead_code))]
fn mount_helper(search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .flat_map(|dir| MOUNT_HELPERS.iter().map(move |helper| dir.join(helper)))
        .find(|candidate| candidate.is_file())
}
