//! Storage on another node of the cluster.
//!
//! The RPC transport is an external collaborator behind
//! [`BlobServiceClient`]; this backend only maps the three contract
//! operations onto it. The server half of the same surface lives in the
//! front-end crate, so a storage node can be chained behind another.

use std::sync::Arc;

use async_trait::async_trait;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::ChunkReader;
use larch_buffer::Result;
use larch_digest::Digest;
use larch_digest::DigestSet;

use crate::blob_access::BlobAccess;
use crate::storage_kind::StorageKind;

/// Client half of the storage-node RPC surface.
#[async_trait]
pub trait BlobServiceClient: Send + Sync {
    /// Stream a blob's contents; a missing blob reads as `NotFound`.
    async fn read(&self, digest: &Digest) -> Result<Box<dyn ChunkReader>>;

    /// Upload a blob, consuming the reader.
    async fn write(&self, digest: &Digest, reader: Box<dyn ChunkReader>) -> Result<()>;

    /// Which of `digests` the remote node cannot serve.
    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet>;
}

/// Delegates storage to a remote node.
pub struct RemoteBlobAccess {
    client: Arc<dyn BlobServiceClient>,
    kind: StorageKind,
}

impl RemoteBlobAccess {
    pub fn new(client: Arc<dyn BlobServiceClient>, kind: StorageKind) -> Self {
        Self { client, kind }
    }
}

#[async_trait]
impl BlobAccess for RemoteBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        match self.client.read(digest).await {
            // The remote node repairs its own corrupt entries; revalidate
            // here to protect against transport faults.
            Ok(reader) => self.kind.new_buffer_from_reader(
                digest,
                digest.size_bytes(),
                reader,
                BufferSource::irreparable(),
            ),
            Err(e) => Buffer::from_error(e),
        }
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        self.client.write(digest, buffer.into_reader()).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        self.client.find_missing(digests).await
    }
}
