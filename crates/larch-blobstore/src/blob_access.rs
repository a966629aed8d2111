//! The uniform storage contract.

use std::sync::Arc;

use async_trait::async_trait;
use larch_buffer::Buffer;
use larch_buffer::Result;
use larch_digest::Digest;
use larch_digest::DigestSet;

/// Uniform contract implemented by every backend and decorator.
///
/// Implementations must be safe under concurrent access to distinct keys and
/// to the same key. Per key, a successful `put` is immediately visible to
/// subsequent `get` and `find_missing` calls on the same instance.
///
/// Cancellation is expressed by dropping the returned future; an
/// implementation dropped at an await point must not leave a partially
/// written object visible under its key.
#[async_trait]
pub trait BlobAccess: Send + Sync {
    /// Fetch a blob.
    ///
    /// Never fails directly: lookup errors (not-found, transient I/O) are
    /// embedded in the returned [`Buffer`] and surface when it is consumed.
    /// Backends report keys they cannot serve as `NotFound` error buffers at
    /// return time, which lets decorators react without consuming the
    /// stream.
    async fn get(&self, digest: &Digest) -> Buffer;

    /// Store a blob under `digest`, consuming the buffer.
    ///
    /// Either the blob is fully stored or no partial object is visible under
    /// its key afterwards.
    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()>;

    /// The subset of `digests` this backend cannot serve.
    ///
    /// Defined for content-addressed storage; action-cache backends return
    /// `Unimplemented`.
    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet>;
}

impl std::fmt::Debug for dyn BlobAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn BlobAccess")
    }
}

#[async_trait]
impl<T: BlobAccess + ?Sized> BlobAccess for Arc<T> {
    async fn get(&self, digest: &Digest) -> Buffer {
        (**self).get(digest).await
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        (**self).put(digest, buffer).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        (**self).find_missing(digests).await
    }
}
