//! Best-effort mirroring across two peer backends.

use std::sync::Arc;

use async_trait::async_trait;
use futures::join;
use futures::try_join;
use larch_buffer::Buffer;
use larch_buffer::ErrorCode;
use larch_buffer::Result;
use larch_digest::Digest;
use larch_digest::DigestSet;
use tracing::debug;

use crate::blob_access::BlobAccess;
use crate::hashing::fnv1a64;
use crate::replication::BlobReplicator;

/// Keeps two peer backends converging on the same blob population.
///
/// Writes go to both sides and only report success when both stored the
/// blob. Reads pick a primary per digest (spreading load), falling back
/// through a replicator when the primary lacks the blob, which also heals
/// the missing side. `find_missing` reconciles: a blob is only missing when
/// both sides lack it, and one-sided blobs are replicated towards the side
/// lacking them. This is eventual convergence through repair traffic, not
/// consensus.
pub struct MirroredBlobAccess {
    backend_a: Arc<dyn BlobAccess>,
    backend_b: Arc<dyn BlobAccess>,
    replicator_a_to_b: Arc<dyn BlobReplicator>,
    replicator_b_to_a: Arc<dyn BlobReplicator>,
}

impl MirroredBlobAccess {
    pub fn new(
        backend_a: Arc<dyn BlobAccess>,
        backend_b: Arc<dyn BlobAccess>,
        replicator_a_to_b: Arc<dyn BlobReplicator>,
        replicator_b_to_a: Arc<dyn BlobReplicator>,
    ) -> Self {
        Self {
            backend_a,
            backend_b,
            replicator_a_to_b,
            replicator_b_to_a,
        }
    }

    fn primary_is_a(&self, digest: &Digest) -> bool {
        fnv1a64(0, digest.hash()) % 2 == 0
    }
}

#[async_trait]
impl BlobAccess for MirroredBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        // The replicator reads from the side that has the blob and writes
        // through to the primary, healing it as a side effect.
        let (primary, replicator_towards_primary, side) = if self.primary_is_a(digest) {
            (&self.backend_a, &self.replicator_b_to_a, "A")
        } else {
            (&self.backend_b, &self.replicator_a_to_b, "B")
        };

        let buffer = primary.get(digest).await;
        match buffer.as_error() {
            Some(error) if error.code() == ErrorCode::NotFound => {
                debug!(%digest, side, "primary lacks blob, replicating from peer");
                replicator_towards_primary.replicate(digest).await
            }
            _ => buffer,
        }
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        let (for_a, for_b) = buffer.clone_stream();
        // Fail fast: the sibling write is cancelled with the first failure,
        // and that failure is what the caller sees.
        try_join!(
            async {
                self.backend_a
                    .put(digest, for_a)
                    .await
                    .map_err(|e| e.with_context("backend A"))
            },
            async {
                self.backend_b
                    .put(digest, for_b)
                    .await
                    .map_err(|e| e.with_context("backend B"))
            },
        )?;
        Ok(())
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        let (from_a, from_b) = join!(
            self.backend_a.find_missing(digests.clone()),
            self.backend_b.find_missing(digests),
        );
        let missing_from_a = from_a.map_err(|e| e.with_context("backend A"))?;
        let missing_from_b = from_b.map_err(|e| e.with_context("backend B"))?;

        // Blobs present on exactly one side flow towards the other.
        let only_in_b = missing_from_a.difference(&missing_from_b);
        let only_in_a = missing_from_b.difference(&missing_from_a);
        if !only_in_b.is_empty() {
            self.replicator_b_to_a
                .replicate_multiple(only_in_b)
                .await
                .map_err(|e| e.with_context("replicating towards backend A"))?;
        }
        if !only_in_a.is_empty() {
            self.replicator_a_to_b
                .replicate_multiple(only_in_a)
                .await
                .map_err(|e| e.with_context("replicating towards backend B"))?;
        }

        Ok(missing_from_a.intersection(&missing_from_b))
    }
}
