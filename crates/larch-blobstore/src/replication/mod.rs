//! Blob replication strategies.
//!
//! A replicator copies blobs from a source backend into a sink backend; the
//! mirrored decorator uses one per direction to heal one-sided blobs. The
//! strategies differ in who performs the copy:
//!
//! - [`LocalBlobReplicator`]: the calling process copies inline. Simple, no
//!   coordination; concurrent callers may duplicate work.
//! - [`RemoteBlobReplicator`]: delegate to an external replicator service,
//!   so many callers wanting the same blob do not dogpile the storage nodes.
//! - [`QueuedBlobReplicator`]: wrap any base strategy with a dedup queue;
//!   duplicate requests collapse and copies drain one at a time.

mod local;
mod queued;
mod remote;

use async_trait::async_trait;
use larch_buffer::Buffer;
use larch_buffer::Result;
use larch_digest::Digest;
use larch_digest::DigestSet;

pub use local::LocalBlobReplicator;
pub use queued::QueuedBlobReplicator;
pub use remote::RemoteBlobReplicator;
pub use remote::ReplicatorClient;

/// Copies blobs from a source backend into a sink backend.
#[async_trait]
pub trait BlobReplicator: Send + Sync {
    /// Replicate one blob and return its contents from the sink.
    ///
    /// Errors, including `NotFound` when the source lacks the blob, are
    /// embedded in the returned buffer.
    async fn replicate(&self, digest: &Digest) -> Buffer;

    /// Replicate a set of blobs without returning contents.
    async fn replicate_multiple(&self, digests: DigestSet) -> Result<()> {
        for digest in digests.iter() {
            let buffer = self.replicate(digest).await;
            if let Some(error) = buffer.as_error() {
                return Err(error.clone());
            }
            buffer.discard();
        }
        Ok(())
    }
}
