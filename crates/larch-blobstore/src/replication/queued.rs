//! Deduplicating, serializing wrapper around any replication strategy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use larch_buffer::Buffer;
use larch_buffer::Result;
use larch_digest::Digest;
use larch_digest::DigestSet;
use tokio::sync::Mutex;
use tracing::debug;

use crate::blob_access::BlobAccess;
use crate::existence_cache::ExistenceCache;
use crate::replication::BlobReplicator;
use crate::storage_kind::StorageKind;

/// Collapses duplicate replication requests and drains copies one at a time.
///
/// Replicated keys are remembered in a bounded TTL cache; a request for a
/// recently copied blob skips the base strategy and reads straight from the
/// sink. Requests that do need a copy queue behind one in-flight copy at a
/// time, bounding the pressure replication can put on storage nodes.
/// Correctness relies on the sink's no-disappearance guarantee for as long
/// as the cache TTL.
pub struct QueuedBlobReplicator {
    base: Arc<dyn BlobReplicator>,
    sink: Arc<dyn BlobAccess>,
    kind: StorageKind,
    completed: ExistenceCache,
    in_flight: Mutex<()>,
}

impl QueuedBlobReplicator {
    pub fn new(
        base: Arc<dyn BlobReplicator>,
        sink: Arc<dyn BlobAccess>,
        kind: StorageKind,
        cache_ttl: Duration,
        cache_capacity: usize,
    ) -> Self {
        Self {
            base,
            sink,
            kind,
            completed: ExistenceCache::new(cache_ttl, cache_capacity),
            in_flight: Mutex::new(()),
        }
    }

    /// Replicate the subset of `digests` not recently copied, serialized
    /// behind the queue lock.
    async fn replicate_missing(&self, digests: DigestSet) -> Result<()> {
        let pending: DigestSet = digests
            .into_iter()
            .filter(|digest| !self.completed.contains(&self.kind.digest_key(digest)))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let _queued = self.in_flight.lock().await;
        // Re-check under the lock: the copy we queued behind may have been
        // for the same keys.
        let pending: DigestSet = pending
            .into_iter()
            .filter(|digest| !self.completed.contains(&self.kind.digest_key(digest)))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "draining replication queue");
        self.base.replicate_multiple(pending.clone()).await?;
        for digest in pending.iter() {
            self.completed.insert(self.kind.digest_key(digest));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobReplicator for QueuedBlobReplicator {
    async fn replicate(&self, digest: &Digest) -> Buffer {
        let digests: DigestSet = [digest.clone()].into_iter().collect();
        if let Err(e) = self.replicate_missing(digests).await {
            return Buffer::from_error(e);
        }
        self.sink.get(digest).await
    }

    async fn replicate_multiple(&self, digests: DigestSet) -> Result<()> {
        self.replicate_missing(digests).await
    }
}
