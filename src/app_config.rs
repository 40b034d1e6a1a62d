//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file. Every field has a default, so a
//! missing file is not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytesize::ByteSize;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use gcloud_fs::cache::metadata::ttl;
use gcloud_fs::fs::readahead::DEFAULT_READ_AHEAD;
use gcloud_fs::lister::DEFAULT_CONCURRENCY;

/// Environment variable consulted when the config file carries no access token.
pub const ACCESS_TOKEN_ENV: &str = "GCLOUD_FS_ACCESS_TOKEN";

fn runtime_dir() -> Option<PathBuf> {
    if let Some(path) = dirs::runtime_dir() {
        return Some(path.join("gcloud-fs"));
    }

    if let Some(path) = dirs::home_dir() {
        return Some(path.join(".local").join("share").join("gcloud-fs"));
    }

    None
}

fn default_mount_point() -> PathBuf {
    runtime_dir().map_or_else(|| PathBuf::from("/tmp/gcloud-fs/mnt"), |rd| rd.join("mnt"))
}

fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

fn current_gid() -> u32 {
    nix::unistd::Gid::current().as_raw()
}

fn default_read_ahead() -> ByteSize {
    ByteSize::b(DEFAULT_READ_AHEAD)
}

fn default_lister_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// The metadata cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// The path to the cache directory.
    pub path: PathBuf,

    /// How long a "does not exist" answer is remembered, in seconds.
    pub negative_ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: runtime_dir()
                .map_or_else(|| PathBuf::from("/tmp/gcloud-fs/cache"), |rd| rd.join("cache")),
            negative_ttl: ttl::NEGATIVE.as_secs(),
        }
    }
}

impl CacheConfig {
    /// The negative TTL as a duration.
    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl)
    }
}

fn serialize_token<S>(token: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match token {
        Some(_) => serializer.serialize_some("****"),
        None => serializer.serialize_none(),
    }
}

/// How the cloud APIs are reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    /// OAuth2 access token. Falls back to `GCLOUD_FS_ACCESS_TOKEN`.
    #[serde(serialize_with = "serialize_token")]
    pub access_token: Option<SecretString>,

    /// Per-request timeout, in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// The configured token, or the one found in the environment.
    pub fn resolve_access_token(&self) -> Option<SecretString> {
        self.access_token.clone().or_else(|| {
            std::env::var(ACCESS_TOKEN_ENV)
                .ok()
                .filter(|t| !t.is_empty())
                .map(SecretString::from)
        })
    }

    /// The request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// The project mounted when none is given on the command line.
    pub project: Option<String>,

    /// The mount point for the filesystem.
    pub mount_point: PathBuf,

    /// The metadata cache.
    pub cache: CacheConfig,

    /// How far ahead of the last read object contents are fetched.
    pub read_ahead: ByteSize,

    /// How many child fetches a single listing may run at once.
    pub lister_concurrency: usize,

    /// Let users other than the mounting one see the mount.
    pub allow_other: bool,

    /// Let the kernel enforce permission bits.
    pub default_permissions: bool,

    /// The user owning every file. If not specified, the current user.
    pub uid: u32,

    /// The group owning every file. If not specified, the current group.
    pub gid: u32,

    /// API access.
    pub api: ApiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: None,
            mount_point: default_mount_point(),
            cache: CacheConfig::default(),
            read_ahead: default_read_ahead(),
            lister_concurrency: default_lister_concurrency(),
            allow_other: false,
            default_permissions: false,
            uid: current_uid(),
            gid: current_gid(),
            api: ApiConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Whether `project` looks like a project id: 6 to 30 lowercase letters, digits or hyphens,
/// starting with a letter and not ending with a hyphen.
fn is_valid_project_id(project: &str) -> bool {
    let bytes = project.as_bytes();
    (6..=30).contains(&bytes.len())
        && bytes.first().is_some_and(u8::is_ascii_lowercase)
        && bytes.last().is_some_and(|b| *b != b'-')
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing a list of validation error messages otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match self.project.as_deref() {
            None | Some("") => errors.push(
                "No project configured. Set `project` in the config file or pass --project."
                    .to_owned(),
            ),
            Some(project) if !is_valid_project_id(project) => {
                errors.push(format!("'{project}' is not a valid project id."));
            }
            Some(_) => {}
        }

        if self.read_ahead.as_u64() == 0 {
            errors.push("read-ahead must be greater than zero.".to_owned());
        }

        if self.lister_concurrency == 0 {
            errors.push("lister-concurrency must be greater than zero.".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("gcloud-fs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("gcloud-fs").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/gcloud-fs/config.toml"));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration from the external path if given, otherwise from the first config file
    /// found. Falls back to the defaults when there is none.
    ///
    /// Errors if a config file exists but is malformed.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = external_config_path {
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => {
                debug!("No configuration file found, using defaults.");
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret as _;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            project = "my-project-1"
            read-ahead = "8 MiB"

            [cache]
            path = "/var/cache/gcloud-fs"
            negative-ttl = 5

            [api]
            access-token = "ya29.secret"
            timeout-secs = 10
            "#,
        )
        .expect("config parses");

        assert_eq!(config.project.as_deref(), Some("my-project-1"));
        assert_eq!(config.read_ahead, ByteSize::mib(8));
        assert_eq!(config.lister_concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.cache.negative_ttl(), Duration::from_secs(5));
        assert_eq!(
            config
                .api
                .access_token
                .as_ref()
                .map(|t| t.expose_secret().to_owned())
                .as_deref(),
            Some("ya29.secret")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn access_token_is_redacted_when_serialized() {
        let mut config = Config::default();
        config.api.access_token = Some(SecretString::from("ya29.secret".to_owned()));
        let rendered = toml::to_string(&config).expect("config serializes");
        assert!(!rendered.contains("ya29.secret"));
        assert!(rendered.contains("****"));
    }

    #[test]
    fn validation_collects_every_problem() {
        let config = Config {
            project: Some("Bad_Project".to_owned()),
            read_ahead: ByteSize::b(0),
            lister_concurrency: 0,
            ..Config::default()
        };
        let errors = config.validate().expect_err("config is invalid");
        assert_eq!(errors.len(), 3);

        let missing = Config::default().validate().expect_err("no project");
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn project_ids() {
        assert!(is_valid_project_id("my-project-1"));
        assert!(!is_valid_project_id("short"));
        assert!(!is_valid_project_id("1starts-with-digit"));
        assert!(!is_valid_project_id("ends-with-hyphen-"));
        assert!(!is_valid_project_id("has_underscore"));
    }
}
