//! Mount a cloud project's storage buckets, datasets and service accounts as a read-only
//! filesystem.
use std::path::PathBuf;

use bytesize::ByteSize;
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod app_config;
mod backend;
mod daemon;
mod fuse_check;
mod trc;

use gcloud_fs::cache::metadata::{CacheOptions, MetadataCache};

use crate::app_config::Config;
use crate::daemon::MountOverrides;
use crate::trc::Trc;

#[derive(Parser)]
#[command(
    version,
    about = "Browse cloud storage, datasets and IAM policies as a read-only filesystem."
)]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a gcloud-fs config TOML."
    )]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount a project and serve it until interrupted.
    Mount {
        /// Where to mount. Defaults to `mount-point` from the config.
        mountpoint: Option<PathBuf>,

        /// The project to mount. Defaults to `project` from the config.
        #[arg(long)]
        project: Option<String>,

        /// Log at debug level.
        #[arg(long)]
        debug: bool,

        /// Log every backend call with its latency.
        #[arg(long)]
        log_backend_calls: bool,

        /// Wipe the metadata cache before mounting.
        #[arg(long)]
        clear_cache: bool,

        /// Read-ahead window per open object, e.g. `8MiB`.
        #[arg(long)]
        read_ahead: Option<ByteSize>,

        /// Let other users access the mount.
        #[arg(long)]
        allow_other: bool,

        /// Let the kernel enforce permission bits.
        #[arg(long)]
        default_permissions: bool,

        /// Extra mount options, passed to the kernel verbatim.
        #[arg(short = 'o', value_name = "OPT")]
        options: Vec<String>,
    },

    /// Inspect or reset the metadata cache without mounting.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Drop cached entries: all of them, or those whose key starts with a prefix.
    Clear {
        /// Only drop keys starting with this, e.g. `storage:objects:my-bucket:`.
        #[arg(long)]
        prefix: Option<String>,
    },
}

fn init_tracing(debug: bool) {
    if let Err(e) = Trc::default().with_debug(debug).init() {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    }
}

fn exit_if_invalid(config: &Config) {
    if let Err(error_messages) = config.validate() {
        error!("Configuration is invalid.");
        for msg in &error_messages {
            error!(" - {msg}");
        }
        std::process::exit(1);
    }
}

fn clear_cache(config: &Config, prefix: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let cache = MetadataCache::open(
            &config.cache.path,
            CacheOptions {
                negative_ttl: config.cache.negative_ttl(),
                clear_on_start: false,
            },
        )
        .await?;
        match prefix {
            Some(prefix) => {
                let dropped = cache.invalidate_prefix(prefix).await?;
                info!(prefix, dropped, "Dropped cache entries.");
            }
            None => {
                cache.clear().await?;
                info!(path = %cache.root().display(), "Cleared the metadata cache.");
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let mut config = Config::load(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    match args.command {
        Command::Mount {
            mountpoint,
            project,
            debug,
            log_backend_calls,
            clear_cache,
            read_ahead,
            allow_other,
            default_permissions,
            options,
        } => {
            init_tracing(debug);

            if let Some(mountpoint) = mountpoint {
                config.mount_point = mountpoint;
            }
            if project.is_some() {
                config.project = project;
            }
            if let Some(read_ahead) = read_ahead {
                config.read_ahead = read_ahead;
            }
            config.allow_other |= allow_other;
            config.default_permissions |= default_permissions;
            exit_if_invalid(&config);

            if let Err(e) = fuse_check::ensure_fuse() {
                error!("{e}");
                std::process::exit(1);
            }

            let project = config.project.clone().unwrap_or_default();
            let overrides = MountOverrides {
                debug,
                log_backend_calls,
                clear_cache,
                raw_options: options,
            };
            if let Err(e) = daemon::spawn(config, project, overrides) {
                error!("gcloud-fs failed: {e}");
                std::process::exit(1);
            }
        }
        Command::Cache {
            command: CacheCommand::Clear { prefix },
        } => {
            init_tracing(false);
            if let Err(e) = clear_cache(&config, prefix.as_deref()) {
                error!("Failed to clear the cache: {e}");
                std::process::exit(1);
            }
        }
    }
}
