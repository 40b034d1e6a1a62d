//! Disk-backed, TTL-based metadata cache with request coalescing and negative caching.
//!
//! Every entry lives in its own file under the cache directory, named by the SHA-256 of its key.
//! The file holds a small JSON envelope recording the key, the time it was cached, when it
//! expires, and either a payload or the "not found" sentinel. Entries survive restarts and are
//! re-checked against their expiry on every read.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace, warn};

use super::single_flight::{FlightError, SingleFlight};
use crate::backend::BackendError;
use crate::io;

/// Expiry tiers used by callers, by volatility of the cached data.
///
/// The cache itself is TTL-agnostic; these are a convention.
pub mod ttl {
    use std::time::Duration;

    /// Rarely-changing descriptive metadata (schemas, bucket descriptors, policies).
    pub const LONG: Duration = Duration::from_secs(24 * 60 * 60);
    /// Counters that drift (row counts).
    pub const MEDIUM: Duration = Duration::from_secs(60 * 60);
    /// Listings and object attributes.
    pub const SHORT: Duration = Duration::from_secs(30 * 60);
    /// Cached "not found" results.
    pub const NEGATIVE: Duration = Duration::from_secs(5 * 60);
}

/// Errors returned by [`MetadataCache::get`].
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The resource does not exist, either freshly reported or remembered from a negative entry.
    #[error("{0}: not found")]
    NotFound(String),

    /// The generator failed with anything other than "not found". Never cached.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A cached payload could not be interpreted.
    #[error("corrupt cache entry for {key}: {reason}")]
    Corrupt {
        /// The affected key.
        key: String,
        /// What went wrong.
        reason: String,
    },

    /// Local disk failure.
    #[error("cache I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The generator panicked.
    #[error("cache generator for {0} panicked")]
    GeneratorPanicked(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Errors opening a cache directory.
#[derive(Debug, Error)]
pub enum InvalidCacheDirError {
    /// The path exists but is not a directory.
    #[error("Cache path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The directory holds files this program did not write.
    #[error("Cache path appears to contain data stemming from sources different to this app: {0}")]
    Foreign(PathBuf),

    /// I/O error while inspecting or preparing the directory.
    #[error("IO error while accessing cache path: {0}")]
    Io(#[from] std::io::Error),
}

/// Construction-time knobs for [`MetadataCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// How long a "not found" result is remembered, regardless of the caller's TTL.
    pub negative_ttl: Duration,
    /// Wipe every existing entry when opening the cache.
    pub clear_on_start: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            negative_ttl: ttl::NEGATIVE,
            clear_on_start: false,
        }
    }
}

/// The on-disk representation of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    negative: bool,
    #[serde(default)]
    payload: String,
}

/// What a disk probe found.
enum Probe {
    Fresh(Bytes),
    Negative,
}

impl Probe {
    fn into_result(self, key: &str) -> Result<Bytes, CacheError> {
        match self {
            Self::Fresh(bytes) => Ok(bytes),
            Self::Negative => Err(CacheError::NotFound(key.to_owned())),
        }
    }
}

/// Disk state shared with in-flight generator futures.
struct Store {
    root: PathBuf,
    negative_ttl: Duration,
    /// Readers share the disk; writers and invalidation are exclusive.
    lock: RwLock<()>,
}

impl Store {
    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root
            .join(format!("{}.{}", hex::encode(digest), MetadataCache::ENTRY_EXTENSION))
    }

    async fn probe(&self, key: &str) -> Option<Probe> {
        let path = self.entry_path(key);
        let raw = {
            let _shared = self.lock.read().await;
            match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
                Err(e) => {
                    warn!(key, error = %e, "failed to read cache entry, treating as miss");
                    return None;
                }
            }
        };

        let envelope: Envelope = match serde_json::from_slice(&raw) {
            Ok(env) => env,
            Err(e) => {
                warn!(key, error = %e, "unreadable cache envelope, treating as miss");
                return None;
            }
        };

        if envelope.key != key {
            warn!(key, stored = %envelope.key, "cache entry key mismatch, treating as miss");
            return None;
        }

        if Utc::now() >= envelope.expires_at {
            trace!(key, expires_at = %envelope.expires_at, "cache entry expired");
            return None;
        }

        if envelope.negative {
            trace!(key, "negative cache hit");
            return Some(Probe::Negative);
        }

        match BASE64.decode(envelope.payload.as_bytes()) {
            Ok(payload) => {
                trace!(key, len = payload.len(), "cache hit");
                Some(Probe::Fresh(normalize(Bytes::from(payload))))
            }
            Err(e) => {
                warn!(key, error = %e, "undecodable cache payload, treating as miss");
                None
            }
        }
    }

    async fn persist(&self, key: &str, ttl: Duration, payload: Option<&Bytes>) {
        let cached_at = Utc::now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| cached_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let envelope = Envelope {
            key: key.to_owned(),
            cached_at,
            expires_at,
            negative: payload.is_none(),
            payload: payload.map(|p| BASE64.encode(p)).unwrap_or_default(),
        };

        let encoded = match serde_json::to_vec(&envelope) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key, error = %e, "failed to encode cache envelope");
                return;
            }
        };

        let _exclusive = self.lock.write().await;
        if let Err(e) = io::write_atomic(&self.entry_path(key), &encoded).await {
            // The value is still served to the caller; it simply won't be remembered.
            warn!(key, error = %e, "failed to persist cache entry");
        }
    }
}

/// Re-serialize a JSON payload into its canonical pretty form.
///
/// Payloads that are not JSON are returned untouched.
fn normalize(payload: Bytes) -> Bytes {
    match serde_json::from_slice::<serde_json::Value>(&payload) {
        Ok(value) => match serde_json::to_vec_pretty(&value) {
            Ok(mut pretty) => {
                pretty.push(b'\n');
                Bytes::from(pretty)
            }
            Err(_) => payload,
        },
        Err(_) => payload,
    }
}

/// The metadata cache.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct MetadataCache {
    store: Arc<Store>,
    flights: SingleFlight<String, Bytes, CacheError>,
}

impl MetadataCache {
    // Dangerous: Changing this constant makes existing cache directories look foreign, which
    // refuses to start until the user wipes them by hand.
    const MARKER_FILE: &'static str = ".gcloud_fs_cache";
    const ENTRY_EXTENSION: &'static str = "entry";

    /// Open (or create) a cache rooted at `dir`.
    ///
    /// If the path exists, it must either be an empty directory, or a directory which was
    /// previously used as a cache by this program.
    pub async fn open(dir: &Path, options: CacheOptions) -> Result<Self, InvalidCacheDirError> {
        let mut pbuf = match tokio::fs::canonicalize(dir).await {
            Ok(mut p) => {
                if !tokio::fs::metadata(&p).await?.is_dir() {
                    return Err(InvalidCacheDirError::NotADirectory(p));
                }

                let mut entries = tokio::fs::read_dir(&p).await?;
                let is_empty = entries.next_entry().await?.is_none();

                p.push(Self::MARKER_FILE);
                let marker_exists = tokio::fs::try_exists(&p).await?;
                p.pop();

                if !(is_empty || marker_exists) {
                    return Err(InvalidCacheDirError::Foreign(p));
                }

                if options.clear_on_start {
                    debug!(path = %p.display(), "wiping metadata cache on start");
                    io::remove_dir_contents(&p).await?;
                }

                p
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(dir).await?;
                tokio::fs::canonicalize(dir).await?
            }
            Err(e) => return Err(e.into()),
        };

        pbuf.push(Self::MARKER_FILE);
        io::touch(&pbuf).await?;
        pbuf.pop();

        Ok(Self {
            store: Arc::new(Store {
                root: pbuf,
                negative_ttl: options.negative_ttl,
                lock: RwLock::new(()),
            }),
            flights: SingleFlight::default(),
        })
    }

    /// The directory holding the entries.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.store.root
    }

    /// Return the payload for `key`, running `generator` on a miss.
    ///
    /// Concurrent misses for the same key share one generator invocation. A generator that
    /// reports "not found" leaves a negative entry behind for the negative TTL; any other
    /// generator error is returned and nothing is cached.
    #[instrument(name = "MetadataCache::get", skip(self, generator))]
    pub async fn get<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        generator: F,
    ) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes, BackendError>> + Send + 'static,
    {
        if let Some(probe) = self.store.probe(key).await {
            return probe.into_result(key);
        }

        let store = Arc::clone(&self.store);
        let owned_key = key.to_owned();
        self.flights
            .run(key.to_owned(), move || async move {
                // A flight for this key may have landed between our probe and this one starting.
                if let Some(probe) = store.probe(&owned_key).await {
                    return probe.into_result(&owned_key);
                }

                debug!(key = %owned_key, "cache miss, invoking generator");
                match generator().await {
                    Ok(payload) => {
                        let payload = normalize(payload);
                        store.persist(&owned_key, ttl, Some(&payload)).await;
                        Ok(payload)
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(key = %owned_key, "generator reported not found, caching negative");
                        store.persist(&owned_key, store.negative_ttl, None).await;
                        Err(CacheError::NotFound(owned_key))
                    }
                    Err(e) => Err(CacheError::Backend(e)),
                }
            })
            .await
            .map_err(|e| match e {
                FlightError::Failed(e) => e,
                FlightError::Panicked => CacheError::GeneratorPanicked(key.to_owned()),
            })
    }

    /// Typed wrapper over [`get`](Self::get): the generator produces a value which is cached as
    /// JSON, and the cached JSON is decoded back into `T`.
    pub async fn get_json<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        generator: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let bytes = self
            .get(key, ttl, move || async move {
                let value = generator().await?;
                serde_json::to_vec(&value)
                    .map(Bytes::from)
                    .map_err(|e| BackendError::Malformed(e.to_string()))
            })
            .await?;

        serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }

    /// The value cached under `key`, if a fresh entry exists. Never runs a generator.
    ///
    /// Negative entries and payloads that do not decode as `T` read as absent.
    pub async fn peek_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.probe(key).await? {
            Probe::Fresh(bytes) => serde_json::from_slice(&bytes).ok(),
            Probe::Negative => None,
        }
    }

    /// Store `value` under `key` without going through a generator.
    ///
    /// Used to seed entries whose data arrived as a by-product of another call (e.g. object
    /// attributes contained in a listing).
    pub async fn put_json<T: Serialize>(&self, key: &str, ttl: Duration, value: &T) {
        match serde_json::to_vec(value) {
            Ok(raw) => {
                let payload = normalize(Bytes::from(raw));
                self.store.persist(key, ttl, Some(&payload)).await;
            }
            Err(e) => warn!(key, error = %e, "failed to encode seeded cache value"),
        }
    }

    /// Drop the entry for exactly `key`.
    #[instrument(name = "MetadataCache::invalidate", skip(self))]
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let _exclusive = self.store.lock.write().await;
        match tokio::fs::remove_file(self.store.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many were removed.
    #[instrument(name = "MetadataCache::invalidate_prefix", skip(self))]
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let _exclusive = self.store.lock.write().await;

        let mut removed = 0usize;
        let mut entries = tokio::fs::read_dir(&self.store.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(Self::ENTRY_EXTENSION) {
                continue;
            }

            let matches = match tokio::fs::read(&path).await {
                Ok(raw) => serde_json::from_slice::<Envelope>(&raw)
                    .map_or(true, |env| env.key.starts_with(prefix)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            };

            // Unreadable envelopes can never be served, so they are swept along.
            if matches {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        debug!(removed, "invalidated cache entries by prefix");
        Ok(removed)
    }

    /// Drop every entry.
    #[instrument(name = "MetadataCache::clear", skip(self))]
    pub async fn clear(&self) -> Result<(), CacheError> {
        let _exclusive = self.store.lock.write().await;
        io::remove_dir_contents(&self.store.root).await?;
        io::touch(&self.store.root.join(Self::MARKER_FILE)).await?;
        Ok(())
    }
}
