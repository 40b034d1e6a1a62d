//! Per-handle read-ahead buffering for remote objects.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace};

use crate::backend::BackendError;

/// Default read-ahead window: 5 MiB.
pub const DEFAULT_READ_AHEAD: u64 = 5 * 1024 * 1024;

/// Something that can serve byte ranges of one remote object.
pub trait RangeSource: Send + Sync + 'static {
    /// Read up to `len` bytes starting at `offset`. Short results are only expected at the end of
    /// the object.
    fn read_range(
        &self,
        offset: u64,
        len: u64,
    ) -> impl Future<Output = Result<Bytes, BackendError>> + Send;
}

/// The single buffered window of a handle.
#[derive(Debug, Default)]
struct Region {
    start: u64,
    data: Bytes,
    valid: bool,
}

impl Region {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    /// Whether `[offset, want_end)` can be answered from this region without a fetch.
    ///
    /// A request running past the buffered end is only answerable when the region already
    /// reaches the end of the object; anything else would hand the kernel a short read, which it
    /// takes for end-of-file.
    fn serves(&self, offset: u64, want_end: u64, object_size: u64) -> bool {
        self.valid
            && offset >= self.start
            && offset < self.end()
            && (want_end <= self.end() || self.end() >= object_size)
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "region offsets are bounded by the buffer length, which fits in usize"
    )]
    fn slice(&self, offset: u64, want_end: u64) -> Bytes {
        let from = (offset.saturating_sub(self.start) as usize).min(self.data.len());
        let to = (want_end.saturating_sub(self.start) as usize).clamp(from, self.data.len());
        self.data.slice(from..to)
    }
}

/// A single-region prefetch buffer owned by one open file handle.
///
/// Reads are serialized through a lock: sequential access is the optimized path, and concurrent
/// reads on the same handle simply take turns.
pub struct ReadAheadBuffer<S> {
    source: S,
    object_size: u64,
    read_ahead: u64,
    region: Mutex<Region>,
}

impl<S: RangeSource> ReadAheadBuffer<S> {
    /// Create an empty buffer over `source`, whose total length is `object_size`.
    pub fn new(source: S, object_size: u64, read_ahead: u64) -> Self {
        Self {
            source,
            object_size,
            read_ahead,
            region: Mutex::new(Region::default()),
        }
    }

    /// Read up to `len` bytes at `offset`, clamped to the object size.
    ///
    /// Served from the buffered region when it covers the request; otherwise exactly one ranged
    /// read refills the region starting at `offset`. A refill that comes back short of both the
    /// requested length and the object end means the object changed under the handle: the bytes
    /// are returned but not kept, so the next read goes back to the source. A failed refill
    /// drops the window too.
    #[instrument(name = "ReadAheadBuffer::read", skip(self))]
    pub async fn read(&self, offset: u64, len: u32) -> Result<Bytes, BackendError> {
        if len == 0 || offset >= self.object_size {
            return Ok(Bytes::new());
        }
        let want_end = offset.saturating_add(u64::from(len)).min(self.object_size);

        let mut region = self.region.lock().await;
        if region.serves(offset, want_end, self.object_size) {
            trace!(start = region.start, end = region.end(), "read-ahead hit");
            return Ok(region.slice(offset, want_end));
        }

        let fetch_len = u64::from(len)
            .max(self.read_ahead)
            .min(self.object_size - offset);
        trace!(offset, fetch_len, "read-ahead refill");
        let data = match self.source.read_range(offset, fetch_len).await {
            Ok(data) => data,
            Err(e) => {
                *region = Region::default();
                return Err(e);
            }
        };

        let stale = (data.len() as u64) < fetch_len;
        if stale {
            debug!(
                offset,
                fetch_len,
                got = data.len(),
                object_size = self.object_size,
                "short read before the object end, dropping the window"
            );
        }
        *region = Region {
            start: offset,
            data,
            valid: !stale,
        };
        Ok(region.slice(offset, want_end))
    }

    /// Drop the buffered window so the next read goes back to the source.
    pub async fn invalidate(&self) {
        let mut region = self.region.lock().await;
        if region.valid {
            trace!(start = region.start, end = region.end(), "read-ahead window dropped");
        }
        *region = Region::default();
    }
}
