//! Read-through caching over a slow source of truth.

use std::sync::Arc;

use async_trait::async_trait;
use larch_buffer::Buffer;
use larch_buffer::ErrorCode;
use larch_buffer::Result;
use larch_digest::Digest;
use larch_digest::DigestSet;
use tracing::debug;
use tracing::warn;

use crate::blob_access::BlobAccess;

/// Serves reads from a fast cache, falling through to a slow backend.
///
/// Writes go to the slow backend only; the fast side is populated on demand
/// by splitting the miss stream, so a cache miss costs one slow read, not
/// two. The fast side is strictly a cache: its write failures are logged
/// and swallowed, and `find_missing` is answered by the slow side alone
/// (the fast population is a subset).
pub struct ReadCachingBlobAccess {
    slow: Arc<dyn BlobAccess>,
    fast: Arc<dyn BlobAccess>,
}

impl ReadCachingBlobAccess {
    pub fn new(slow: Arc<dyn BlobAccess>, fast: Arc<dyn BlobAccess>) -> Self {
        Self { slow, fast }
    }
}

#[async_trait]
impl BlobAccess for ReadCachingBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let cached = self.fast.get(digest).await;
        match cached.as_error() {
            Some(error) if error.code() == ErrorCode::NotFound => {}
            _ => return cached,
        }

        let buffer = self.slow.get(digest).await;
        if buffer.as_error().is_some() {
            return buffer;
        }

        let (for_caller, for_cache) = buffer.clone_stream();
        let fast = Arc::clone(&self.fast);
        let digest_for_cache = digest.clone();
        // Populate the cache off the caller's path. The tee window fails
        // the cache side if this task stalls, never the caller's side.
        tokio::spawn(async move {
            match fast.put(&digest_for_cache, for_cache).await {
                Ok(()) => debug!(digest = %digest_for_cache, "blob cached"),
                Err(e) => warn!(digest = %digest_for_cache, error = %e, "failed to cache blob"),
            }
        });
        for_caller
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        self.slow.put(digest, buffer).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        self.slow.find_missing(digests).await
    }
}
