//! CAS / AC storage policy.

use bytes::Bytes;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::ChunkReader;
use larch_buffer::Validation;
use larch_digest::Digest;

/// Discriminates the two object families the storage plane serves.
///
/// The kind decides the on-backend key format and how buffers built from raw
/// backend data are validated. Content-addressed blobs omit the instance
/// name from their key (identical content is shared across instances) and
/// are self-verifying; action-cache entries are keyed per instance and hold
/// opaque payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Cas,
    Ac,
}

impl StorageKind {
    /// The canonical backend key for a digest.
    pub fn digest_key(&self, digest: &Digest) -> String {
        match self {
            StorageKind::Cas => format!("{}-{}", digest.hash_hex(), digest.size_bytes()),
            StorageKind::Ac => format!(
                "{}/{}-{}",
                digest.instance_name(),
                digest.hash_hex(),
                digest.size_bytes()
            ),
        }
    }

    /// The validation policy for buffers of this kind.
    pub fn validation(&self) -> Validation {
        match self {
            StorageKind::Cas => Validation::FullIntegrity,
            StorageKind::Ac => Validation::SizeOnly,
        }
    }

    /// Build a buffer from bytes a backend has stored.
    ///
    /// Action-cache payload lengths are not derivable from the key digest,
    /// so the buffer declares the stored length instead.
    pub fn new_buffer_from_bytes(&self, digest: &Digest, data: Bytes, source: BufferSource) -> Buffer {
        let declared = match self {
            StorageKind::Cas => digest.clone(),
            StorageKind::Ac => digest.with_size_bytes(data.len() as i64),
        };
        Buffer::from_bytes(declared, self.validation(), data, source)
    }

    /// Build a buffer from a backend reader with a known stored length.
    pub fn new_buffer_from_reader(
        &self,
        digest: &Digest,
        stored_size_bytes: i64,
        reader: Box<dyn ChunkReader>,
        source: BufferSource,
    ) -> Buffer {
        let declared = match self {
            StorageKind::Cas => digest.clone(),
            StorageKind::Ac => digest.with_size_bytes(stored_size_bytes),
        };
        Buffer::from_reader(declared, self.validation(), reader, source)
    }
}
