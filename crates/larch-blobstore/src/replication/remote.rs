//! Replication delegated to an external service.

use std::sync::Arc;

use async_trait::async_trait;
use larch_buffer::Buffer;
use larch_buffer::Result;
use larch_digest::Digest;
use larch_digest::DigestSet;

use crate::blob_access::BlobAccess;
use crate::replication::BlobReplicator;

/// Client half of the replicator service RPC surface.
///
/// The service owns the source and sink pairing; callers only name digests.
#[async_trait]
pub trait ReplicatorClient: Send + Sync {
    /// Ask the service to copy `digests` from its source into its sink,
    /// returning once the copies are durable.
    async fn replicate(&self, digests: DigestSet) -> Result<()>;
}

/// Hands replication requests to a central replicator service.
///
/// Useful when many clients would otherwise copy the same blob at once: the
/// service can coalesce them, while this process only waits for completion
/// and then reads the blob back from the sink.
pub struct RemoteBlobReplicator {
    client: Arc<dyn ReplicatorClient>,
    sink: Arc<dyn BlobAccess>,
}

impl RemoteBlobReplicator {
    pub fn new(client: Arc<dyn ReplicatorClient>, sink: Arc<dyn BlobAccess>) -> Self {
        Self { client, sink }
    }
}

#[async_trait]
impl BlobReplicator for RemoteBlobReplicator {
    async fn replicate(&self, digest: &Digest) -> Buffer {
        let digests: DigestSet = [digest.clone()].into_iter().collect();
        if let Err(e) = self.client.replicate(digests).await {
            return Buffer::from_error(e.with_context("remote replication"));
        }
        self.sink.get(digest).await
    }

    async fn replicate_multiple(&self, digests: DigestSet) -> Result<()> {
        self.client
            .replicate(digests)
            .await
            .map_err(|e| e.with_context("remote replication"))
    }
}
