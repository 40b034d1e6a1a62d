//! Readers handed out by [`CloudTree::open`](super::CloudTree).

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, CloudBackend, cancellable};
use crate::fs::async_fs::FileReader;
use crate::fs::readahead::{RangeSource, ReadAheadBuffer};

/// Ranged reads of one storage object.
pub struct ObjectSource<B> {
    backend: Arc<B>,
    cancel: CancellationToken,
    bucket: String,
    name: String,
}

impl<B> ObjectSource<B> {
    pub(super) fn new(backend: Arc<B>, cancel: CancellationToken, bucket: String, name: String) -> Self {
        Self {
            backend,
            cancel,
            bucket,
            name,
        }
    }
}

impl<B: CloudBackend> RangeSource for ObjectSource<B> {
    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes, BackendError> {
        cancellable(
            &self.cancel,
            self.backend
                .read_object_range(&self.bucket, &self.name, offset, len),
        )
        .await
    }
}

/// The reader behind one open file handle.
pub enum NodeReader<B> {
    /// Generated content, captured whole when the handle was opened.
    Virtual(Bytes),
    /// A storage object, read through its own read-ahead buffer.
    Object(ReadAheadBuffer<ObjectSource<B>>),
}

impl<B> std::fmt::Debug for NodeReader<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Virtual(bytes) => f.debug_tuple("Virtual").field(&bytes.len()).finish(),
            Self::Object(_) => f.debug_tuple("Object").finish_non_exhaustive(),
        }
    }
}

impl<B: CloudBackend> FileReader for NodeReader<B> {
    async fn read(&self, offset: u64, size: u32) -> Result<Bytes, std::io::Error> {
        match self {
            Self::Virtual(content) => Ok(slice_clamped(content, offset, size)),
            Self::Object(buffer) => Ok(buffer.read(offset, size).await?),
        }
    }

    async fn close(&self) -> Result<(), std::io::Error> {
        if let Self::Object(buffer) = self {
            buffer.invalidate().await;
        }
        Ok(())
    }
}

/// `content[offset..offset + size]`, clamped to the content length.
#[expect(
    clippy::cast_possible_truncation,
    reason = "virtual file content is in memory, so its offsets fit in usize"
)]
fn slice_clamped(content: &Bytes, offset: u64, size: u32) -> Bytes {
    let len = content.len() as u64;
    let start = offset.min(len);
    let end = offset.saturating_add(u64::from(size)).min(len);
    content.slice(start as usize..end as usize)
}
