//! Caching of positive `find_missing` answers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use larch_buffer::Buffer;
use larch_buffer::Result;
use larch_digest::Digest;
use larch_digest::DigestSet;
use tracing::debug;

use crate::blob_access::BlobAccess;
use crate::existence_cache::ExistenceCache;
use crate::storage_kind::StorageKind;

/// Skips re-querying digests recently observed to exist.
///
/// Build clients call `FindMissingBlobs` with heavily overlapping digest
/// sets; this decorator answers the overlap from memory. Only existence is
/// cached, never absence: a missing blob may be uploaded at any moment.
///
/// Configuration constraint: the underlying backend must not lose blobs
/// within the cache TTL (no-disappearance-after-observed). Fronting an
/// aggressively evicting store with a long TTL makes clients skip uploads
/// for blobs that are already gone.
pub struct ExistenceCachingBlobAccess {
    backend: Arc<dyn BlobAccess>,
    kind: StorageKind,
    cache: ExistenceCache,
}

impl ExistenceCachingBlobAccess {
    pub fn new(backend: Arc<dyn BlobAccess>, kind: StorageKind, ttl: Duration, capacity: usize) -> Self {
        Self {
            backend,
            kind,
            cache: ExistenceCache::new(ttl, capacity),
        }
    }
}

#[async_trait]
impl BlobAccess for ExistenceCachingBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        self.backend.get(digest).await
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        self.backend.put(digest, buffer).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        let to_query: DigestSet = digests
            .into_iter()
            .filter(|digest| !self.cache.contains(&self.kind.digest_key(digest)))
            .collect();
        if to_query.is_empty() {
            return Ok(DigestSet::empty());
        }

        let missing = self.backend.find_missing(to_query.clone()).await?;
        let present = to_query.difference(&missing);
        debug!(queried = to_query.len(), cached = present.len(), "existence observed");
        for digest in present.iter() {
            self.cache.insert(self.kind.digest_key(digest));
        }
        Ok(missing)
    }
}
