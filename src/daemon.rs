//! Running a mount in the foreground until a signal or an external unmount ends it.

use std::path::Path;

use secrecy::ExposeSecret as _;
use thiserror::Error;
use tokio::select;
use tracing::{debug, info, warn};

use gcloud_fs::mount::{self, MountError, MountOptions};

use crate::app_config::{self, ACCESS_TOKEN_ENV};
use crate::backend::GcpBackend;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("no access token configured; set api.access-token or {ACCESS_TOKEN_ENV}")]
    MissingAccessToken,

    #[error("failed to create the tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Mount(#[from] MountError),
}

/// Prepares the mount point directory.
///
/// - If the directory exists and is non-empty, returns an error.
/// - If the directory does not exist, creates it (including parents) and logs an info message.
/// - If the directory exists and is empty, does nothing.
async fn prepare_mount_point(mount_point: &Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(mount_point).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "Mount point '{}' already exists and is not empty.",
                        mount_point.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C signal, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}

/// Knobs given on the command line that override or extend the config file.
#[derive(Debug, Default)]
pub struct MountOverrides {
    pub debug: bool,
    pub log_backend_calls: bool,
    pub clear_cache: bool,
    pub raw_options: Vec<String>,
}

fn mount_options(
    config: &app_config::Config,
    project: String,
    overrides: MountOverrides,
) -> MountOptions {
    let mut options = MountOptions::new(project, config.cache.path.clone());
    options.debug = overrides.debug;
    options.log_backend_calls = overrides.log_backend_calls;
    options.clear_cache = overrides.clear_cache;
    options.raw_options = overrides.raw_options;
    options.read_ahead_size = config.read_ahead.as_u64();
    options.allow_other = config.allow_other;
    options.default_permissions = config.default_permissions;
    options.uid = config.uid;
    options.gid = config.gid;
    options.negative_ttl = config.cache.negative_ttl();
    options.lister_concurrency = config.lister_concurrency;
    options
}

/// Mount, then serve until told to stop.
pub async fn run(
    config: app_config::Config,
    project: String,
    overrides: MountOverrides,
) -> Result<(), DaemonError> {
    let token = config
        .api
        .resolve_access_token()
        .ok_or(DaemonError::MissingAccessToken)?;
    let client = gcp_api::Gcp::builder(token.expose_secret())
        .timeout(config.api.timeout())
        .build();

    tokio::fs::create_dir_all(&config.cache.path).await?;
    prepare_mount_point(&config.mount_point).await?;

    info!("Mounting {project} at {}.", config.mount_point.display());
    let options = mount_options(&config, project, overrides);
    let handle = mount::mount(&config.mount_point, GcpBackend::new(client), options).await?;
    info!("gcloud-fs is running. Press Ctrl+C to stop.");

    select! {
        res = wait_for_exit() => res?,
        () = handle.wait() => {
            warn!(mountpoint = %handle.mountpoint().display(), "Filesystem was unmounted externally.");
        },
    }

    handle.unmount().await?;
    Ok(())
}

pub fn spawn(
    config: app_config::Config,
    project: String,
    overrides: MountOverrides,
) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;
    runtime.block_on(run(config, project, overrides))
}
