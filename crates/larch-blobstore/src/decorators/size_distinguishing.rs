//! Routing by blob size.

use std::sync::Arc;

use async_trait::async_trait;
use futures::join;
use larch_buffer::Buffer;
use larch_buffer::Result;
use larch_digest::Digest;
use larch_digest::DigestSet;

use crate::blob_access::BlobAccess;

/// Routes small blobs to one backend and large blobs to another.
///
/// The size is part of the digest, so every operation, `get` included,
/// picks its backend without probing. Typical deployment: small blobs on a
/// low-latency store, large blobs on a cheap bulk store.
pub struct SizeDistinguishingBlobAccess {
    small: Arc<dyn BlobAccess>,
    large: Arc<dyn BlobAccess>,
    cutoff_size_bytes: i64,
}

impl SizeDistinguishingBlobAccess {
    pub fn new(small: Arc<dyn BlobAccess>, large: Arc<dyn BlobAccess>, cutoff_size_bytes: i64) -> Self {
        Self {
            small,
            large,
            cutoff_size_bytes,
        }
    }

    fn backend_for(&self, digest: &Digest) -> &Arc<dyn BlobAccess> {
        if digest.size_bytes() <= self.cutoff_size_bytes {
            &self.small
        } else {
            &self.large
        }
    }
}

#[async_trait]
impl BlobAccess for SizeDistinguishingBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        self.backend_for(digest).get(digest).await
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        self.backend_for(digest).put(digest, buffer).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        let mut small = DigestSet::builder();
        let mut large = DigestSet::builder();
        for digest in digests {
            if digest.size_bytes() <= self.cutoff_size_bytes {
                small.add(digest);
            } else {
                large.add(digest);
            }
        }
        let (from_small, from_large) = join!(
            self.small.find_missing(small.build()),
            self.large.find_missing(large.build()),
        );
        Ok(from_small
            .map_err(|e| e.with_context("small backend"))?
            .union(&from_large.map_err(|e| e.with_context("large backend"))?))
    }
}
