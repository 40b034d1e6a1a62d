#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use gcloud_fs::backend::BackendError;
use gcloud_fs::cache::metadata::{CacheError, CacheOptions, InvalidCacheDirError, MetadataCache};

const HOUR: Duration = Duration::from_secs(60 * 60);

async fn open(dir: &tempfile::TempDir) -> MetadataCache {
    MetadataCache::open(dir.path(), CacheOptions::default())
        .await
        .unwrap()
}

/// A generator returning `payload` and counting how often it ran.
fn counted(
    calls: &Arc<AtomicUsize>,
    payload: &'static str,
) -> impl FnOnce() -> std::future::Ready<Result<Bytes, BackendError>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(Bytes::from_static(payload.as_bytes())))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_creates_directory_and_marker() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("cache");

    let _cache = MetadataCache::open(&path, CacheOptions::default())
        .await
        .unwrap();

    assert!(path.join(".gcloud_fs_cache").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_rejects_foreign_directory() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("notes.txt"), b"mine").unwrap();

    let result = MetadataCache::open(tmp.path(), CacheOptions::default()).await;

    assert!(
        matches!(result, Err(InvalidCacheDirError::Foreign(_))),
        "expected Foreign, got {:?}",
        result.as_ref().map(|_| "Ok(...)").map_err(|e| format!("{e:?}"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_rejects_file_path() {
    let tmp = tempfile::tempdir().unwrap();
    let file_path = tmp.path().join("not_a_dir");
    std::fs::write(&file_path, b"hello").unwrap();

    let result = MetadataCache::open(&file_path, CacheOptions::default()).await;

    assert!(matches!(result, Err(InvalidCacheDirError::NotADirectory(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hit_does_not_run_the_generator() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache.get("k", HOUR, counted(&calls, r#"{"a":1}"#)).await.unwrap();
    let second = cache.get("k", HOUR, counted(&calls, r#"{"a":2}"#)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn payloads_are_pretty_printed_with_trailing_newline() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let payload = cache.get("k", HOUR, counted(&calls, r#"{"a":1}"#)).await.unwrap();

    assert_eq!(payload.as_ref(), b"{\n  \"a\": 1\n}\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn entries_survive_reopening() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let cache = open(&tmp).await;
        cache.get("k", HOUR, counted(&calls, "[1]")).await.unwrap();
    }
    let cache = open(&tmp).await;
    cache.get("k", HOUR, counted(&calls, "[2]")).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clear_on_start_discards_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let cache = open(&tmp).await;
        cache.get("k", HOUR, counted(&calls, "[1]")).await.unwrap();
    }
    let cache = MetadataCache::open(
        tmp.path(),
        CacheOptions {
            clear_on_start: true,
            ..CacheOptions::default()
        },
    )
    .await
    .unwrap();
    cache.get("k", HOUR, counted(&calls, "[2]")).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(tmp.path().join(".gcloud_fs_cache").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_entries_are_regenerated() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_millis(50);

    cache.get("k", ttl, counted(&calls, "1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    let fresh = cache.get("k", ttl, counted(&calls, "2")).await.unwrap();

    assert_eq!(fresh.as_ref(), b"2\n");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn not_found_is_cached_for_the_negative_ttl() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = MetadataCache::open(
        tmp.path(),
        CacheOptions {
            negative_ttl: Duration::from_millis(80),
            ..CacheOptions::default()
        },
    )
    .await
    .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let c = Arc::clone(&calls);
        let res = cache
            .get("gone", HOUR, move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::NotFound("gone".to_owned()))
            })
            .await;
        assert!(matches!(res, Err(CacheError::NotFound(ref k)) if k == "gone"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "negative entry answers repeats");

    tokio::time::sleep(Duration::from_millis(150)).await;
    let payload = cache.get("gone", HOUR, counted(&calls, "true")).await.unwrap();
    assert_eq!(payload.as_ref(), b"true\n");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn other_failures_are_not_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let c = Arc::clone(&calls);
    let res = cache
        .get("k", HOUR, move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Status {
                status: 503,
                message: "unavailable".to_owned(),
            })
        })
        .await;
    assert!(matches!(
        res,
        Err(CacheError::Backend(BackendError::Status { status: 503, .. }))
    ));

    cache.get("k", HOUR, counted(&calls, "1")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalidate_drops_one_key() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("a", HOUR, counted(&calls, "1")).await.unwrap();
    cache.get("b", HOUR, counted(&calls, "1")).await.unwrap();
    cache.invalidate("a").await.unwrap();
    cache.invalidate("never-cached").await.unwrap();

    cache.get("a", HOUR, counted(&calls, "2")).await.unwrap();
    cache.get("b", HOUR, counted(&calls, "2")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalidate_prefix_drops_matching_keys() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;
    let calls = Arc::new(AtomicUsize::new(0));

    for key in [
        "storage:objects:b1:",
        "storage:objects:b1:logs/",
        "storage:objects:b2:",
        "bigquery:datasets:p1",
    ] {
        cache.get(key, HOUR, counted(&calls, "[]")).await.unwrap();
    }

    let removed = cache.invalidate_prefix("storage:objects:b1:").await.unwrap();
    assert_eq!(removed, 2);

    cache
        .get("storage:objects:b2:", HOUR, counted(&calls, "[]"))
        .await
        .unwrap();
    cache
        .get("storage:objects:b1:logs/", HOUR, counted(&calls, "[]"))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clear_drops_everything_but_keeps_the_marker() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("a", HOUR, counted(&calls, "1")).await.unwrap();
    cache.get("b", HOUR, counted(&calls, "1")).await.unwrap();
    cache.clear().await.unwrap();

    assert!(tmp.path().join(".gcloud_fs_cache").exists());
    cache.get("a", HOUR, counted(&calls, "1")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Counts callers whose generator was discarded without running, i.e. who joined a flight.
struct Arrival {
    joined: Arc<AtomicUsize>,
    ran: bool,
}

impl Drop for Arrival {
    fn drop(&mut self) {
        if !self.ran {
            self.joined.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_share_one_generator() {
    const CALLERS: usize = 16;

    let tmp = tempfile::tempdir().unwrap();
    let cache = Arc::new(open(&tmp).await);
    let calls = Arc::new(AtomicUsize::new(0));
    let joined = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());

    let mut tasks = Vec::new();
    for _ in 0..CALLERS {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let release = Arc::clone(&release);
        let arrival = Arrival {
            joined: Arc::clone(&joined),
            ran: false,
        };
        tasks.push(tokio::spawn(async move {
            cache
                .get("slow", HOUR, move || {
                    let mut arrival = arrival;
                    arrival.ran = true;
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        release.notified().await;
                        Ok(Bytes::from_static(b"\"done\""))
                    }
                })
                .await
        }));
    }

    // The generator stays blocked until every other caller is parked on its flight.
    tokio::time::timeout(Duration::from_secs(10), async {
        while joined.load(Ordering::SeqCst) < CALLERS - 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("every other caller should join the running generator");
    release.notify_one();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().as_ref(), b"\"done\"\n");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Listing {
    names: Vec<String>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn typed_values_round_trip_and_can_be_seeded() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;

    let seeded = Listing {
        names: vec!["a".to_owned(), "b".to_owned()],
    };
    cache.put_json("listing", HOUR, &seeded).await;

    let got: Listing = cache
        .get_json("listing", HOUR, || async {
            Err(BackendError::Transport("should not be called".to_owned()))
        })
        .await
        .unwrap();
    assert_eq!(got, seeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peek_only_reads_fresh_positive_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;
    let seeded = Listing {
        names: vec!["a".to_owned()],
    };

    assert_eq!(cache.peek_json::<Listing>("listing").await, None);

    cache.put_json("listing", HOUR, &seeded).await;
    assert_eq!(cache.peek_json::<Listing>("listing").await, Some(seeded));
    assert_eq!(
        cache.peek_json::<u64>("listing").await,
        None,
        "a payload of another shape reads as absent"
    );

    let _ = cache
        .get("gone", HOUR, || async {
            Err(BackendError::NotFound("gone".to_owned()))
        })
        .await;
    assert_eq!(cache.peek_json::<Listing>("gone").await, None);

    cache
        .put_json("stale", Duration::ZERO, &Listing { names: Vec::new() })
        .await;
    assert_eq!(cache.peek_json::<Listing>("stale").await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undecodable_payload_is_corrupt() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = open(&tmp).await;
    cache.put_json("k", HOUR, &"just a string").await;

    let res: Result<Listing, _> = cache
        .get_json("k", HOUR, || async {
            Err(BackendError::Transport("unused".to_owned()))
        })
        .await;

    assert!(matches!(res, Err(CacheError::Corrupt { ref key, .. }) if key == "k"));
}
