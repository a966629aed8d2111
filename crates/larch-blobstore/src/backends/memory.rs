//! In-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::Result;
use larch_buffer::StorageError;
use larch_digest::Digest;
use larch_digest::DigestSet;
use parking_lot::RwLock;
use tracing::debug;

use crate::blob_access::BlobAccess;
use crate::storage_kind::StorageKind;

/// Holds every blob in process memory.
///
/// The reference backend: it realizes the contract exactly and anchors the
/// composition tests for every decorator. Also useful in production as the
/// fast side of a read cache.
pub struct MemoryBlobAccess {
    kind: StorageKind,
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryBlobAccess {
    pub fn new(kind: StorageKind) -> Self {
        Self {
            kind,
            blobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl BlobAccess for MemoryBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let key = self.kind.digest_key(digest);
        let data = match self.blobs.read().get(&key) {
            Some(data) => data.clone(),
            None => return Buffer::from_error(StorageError::not_found(key)),
        };
        let blobs = Arc::clone(&self.blobs);
        let repair_key = key.clone();
        self.kind.new_buffer_from_bytes(
            digest,
            data,
            BufferSource::reparable(move || async move {
                blobs.write().remove(&repair_key);
                Ok(())
            }),
        )
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        let max_size = buffer.declared_size().unwrap_or(digest.size_bytes()).max(0) as usize;
        let data = buffer.into_bytes(max_size).await?;
        let key = self.kind.digest_key(digest);
        debug!(%digest, size = data.len(), "blob stored in memory");
        self.blobs.write().insert(key, data);
        Ok(())
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        if self.kind == StorageKind::Ac {
            return Err(StorageError::unimplemented(
                "action-cache backends do not support find_missing",
            ));
        }
        let blobs = self.blobs.read();
        Ok(digests
            .into_iter()
            .filter(|digest| !blobs.contains_key(&self.kind.digest_key(digest)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use larch_buffer::ErrorCode;
    use larch_testing::cas_blob;
    use larch_testing::cas_buffer;
    use larch_testing::cas_buffer_for;

    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let storage = MemoryBlobAccess::new(StorageKind::Cas);
        let (digest, data) = cas_blob(b"hello");

        storage.put(&digest, cas_buffer(b"hello")).await.unwrap();
        let read = storage.get(&digest).await.into_bytes(1024).await.unwrap();
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn get_of_absent_blob_is_not_found() {
        let storage = MemoryBlobAccess::new(StorageKind::Cas);
        let (digest, _) = cas_blob(b"absent");
        let buffer = storage.get(&digest).await;
        assert_eq!(buffer.as_error().map(|e| e.code()), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn put_of_corrupt_blob_stores_nothing() {
        let storage = MemoryBlobAccess::new(StorageKind::Cas);
        let (digest, _) = cas_blob(b"hello");

        // Contents do not match the digest, so validation inside put fails.
        let err = storage.put(&digest, cas_buffer_for(&digest, b"jello")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);

        let buffer = storage.get(&digest).await;
        assert_eq!(buffer.as_error().map(|e| e.code()), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn find_missing_reports_exactly_the_absent_digests() {
        let storage = MemoryBlobAccess::new(StorageKind::Cas);
        let (present, _) = cas_blob(b"present");
        let (absent, _) = cas_blob(b"absent");
        storage.put(&present, cas_buffer(b"present")).await.unwrap();

        let query: DigestSet = [present.clone(), absent.clone()].into_iter().collect();
        let missing = storage.find_missing(query).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert!(missing.contains(&absent));
        assert!(!missing.contains(&present));
    }

    #[tokio::test]
    async fn find_missing_on_action_cache_is_unimplemented() {
        let storage = MemoryBlobAccess::new(StorageKind::Ac);
        let err = storage.find_missing(DigestSet::empty()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unimplemented);
    }

    #[tokio::test]
    async fn corrupt_entry_is_repaired_on_read() {
        let storage = MemoryBlobAccess::new(StorageKind::Cas);
        let (digest, _) = cas_blob(b"hello");

        // Plant corrupt bytes directly under the digest's key.
        storage
            .blobs
            .write()
            .insert(StorageKind::Cas.digest_key(&digest), Bytes::from_static(b"jello"));

        let err = storage.get(&digest).await.into_bytes(1024).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);

        // The repair hook removed the corrupt entry.
        let buffer = storage.get(&digest).await;
        assert_eq!(buffer.as_error().map(|e| e.code()), Some(ErrorCode::NotFound));
    }
}
