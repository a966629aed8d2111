//! Backend that fails every operation with a fixed error.

use async_trait::async_trait;
use larch_buffer::Buffer;
use larch_buffer::Result;
use larch_buffer::StorageError;
use larch_digest::Digest;
use larch_digest::DigestSet;

use crate::blob_access::BlobAccess;

/// Returns one configured error on every call.
///
/// Stands in for an unreachable or decommissioned backend when composing
/// storage trees, and doubles as the failure injector in decorator tests.
pub struct ErrorBlobAccess {
    error: StorageError,
}

impl ErrorBlobAccess {
    pub fn new(error: StorageError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl BlobAccess for ErrorBlobAccess {
    async fn get(&self, _digest: &Digest) -> Buffer {
        Buffer::from_error(self.error.clone())
    }

    async fn put(&self, _digest: &Digest, buffer: Buffer) -> Result<()> {
        buffer.discard();
        Err(self.error.clone())
    }

    async fn find_missing(&self, _digests: DigestSet) -> Result<DigestSet> {
        Err(self.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use larch_buffer::ErrorCode;
    use larch_testing::cas_blob;
    use larch_testing::cas_buffer;

    use super::*;

    #[tokio::test]
    async fn every_operation_reports_the_configured_error() {
        let storage = ErrorBlobAccess::new(StorageError::unavailable("maintenance window"));
        let (digest, _) = cas_blob(b"hello");

        let buffer = storage.get(&digest).await;
        assert_eq!(buffer.as_error().map(|e| e.code()), Some(ErrorCode::Unavailable));

        let err = storage.put(&digest, cas_buffer(b"hello")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);

        let err = storage.find_missing(DigestSet::empty()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }
}
