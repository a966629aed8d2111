//! Inline replication by the calling process.

use std::sync::Arc;

use async_trait::async_trait;
use larch_buffer::Buffer;
use larch_digest::Digest;
use tracing::debug;

use crate::blob_access::BlobAccess;
use crate::replication::BlobReplicator;

/// Copies a blob by reading it from the source and writing it to the sink.
///
/// The copy is written before anything is returned, so the serving read
/// comes from the sink and inherits its read-your-writes guarantee. The
/// source stream is validated on the way through `put`, so corruption is
/// caught (and repaired at the source) instead of propagated.
pub struct LocalBlobReplicator {
    source: Arc<dyn BlobAccess>,
    sink: Arc<dyn BlobAccess>,
}

impl LocalBlobReplicator {
    pub fn new(source: Arc<dyn BlobAccess>, sink: Arc<dyn BlobAccess>) -> Self {
        Self { source, sink }
    }
}

#[async_trait]
impl BlobReplicator for LocalBlobReplicator {
    async fn replicate(&self, digest: &Digest) -> Buffer {
        let buffer = self.source.get(digest).await;
        if buffer.as_error().is_some() {
            return buffer;
        }
        if let Err(e) = self.sink.put(digest, buffer).await {
            return Buffer::from_error(e.with_context("replication"));
        }
        debug!(%digest, "blob replicated");
        self.sink.get(digest).await
    }
}
