//! Cloud bucket storage (S3 / GCS / Azure).
//!
//! The provider SDK is an external collaborator behind [`Bucket`]; this
//! module owns the semantics the storage plane depends on, most importantly
//! that a failed upload is aborted before the writer is closed so a partial
//! object is never committed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::ChunkReader;
use larch_buffer::Result;
use larch_buffer::StorageError;
use larch_digest::Digest;
use larch_digest::DigestSet;
use tracing::debug;

use crate::blob_access::BlobAccess;
use crate::storage_kind::StorageKind;

/// An object under a bucket key: its contents and recorded length.
pub struct BucketObject {
    pub reader: Box<dyn ChunkReader>,
    pub size_bytes: i64,
}

/// Streaming upload of one object.
///
/// The object only becomes visible when `close` succeeds; `abort` discards
/// everything written so far.
#[async_trait]
pub trait BucketWriter: Send {
    async fn write(&mut self, data: Bytes) -> Result<()>;
    async fn close(self: Box<Self>) -> Result<()>;
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Minimal bucket surface the backend consumes.
///
/// Implementations translate provider errors into the storage taxonomy;
/// in particular a missing object must read as `NotFound`.
#[async_trait]
pub trait Bucket: Send + Sync {
    async fn new_reader(&self, key: &str) -> Result<BucketObject>;
    async fn new_writer(&self, key: &str) -> Result<Box<dyn BucketWriter>>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Stores blobs in a cloud bucket.
pub struct CloudBlobAccess {
    bucket: Arc<dyn Bucket>,
    key_prefix: String,
    kind: StorageKind,
}

impl CloudBlobAccess {
    pub fn new(bucket: Arc<dyn Bucket>, key_prefix: impl Into<String>, kind: StorageKind) -> Self {
        Self {
            bucket,
            key_prefix: key_prefix.into(),
            kind,
        }
    }

    fn key(&self, digest: &Digest) -> String {
        format!("{}{}", self.key_prefix, self.kind.digest_key(digest))
    }
}

#[async_trait]
impl BlobAccess for CloudBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let key = self.key(digest);
        let object = match self.bucket.new_reader(&key).await {
            Ok(object) => object,
            Err(e) => return Buffer::from_error(e),
        };
        let bucket = Arc::clone(&self.bucket);
        let repair_key = key.clone();
        self.kind.new_buffer_from_reader(
            digest,
            object.size_bytes,
            object.reader,
            BufferSource::reparable(move || async move { bucket.delete(&repair_key).await }),
        )
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        let mut reader = buffer.into_reader();
        let mut writer = self.bucket.new_writer(&self.key(digest)).await?;
        loop {
            // Abort before close on any failure, so the provider never
            // commits a partial object.
            let chunk = match reader.read_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    writer.abort().await?;
                    return Err(e);
                }
            };
            if let Err(e) = writer.write(chunk).await {
                writer.abort().await?;
                return Err(e);
            }
        }
        writer.close().await?;
        debug!(%digest, "blob stored in bucket");
        Ok(())
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        if self.kind == StorageKind::Ac {
            return Err(StorageError::unimplemented(
                "action-cache backends do not support find_missing",
            ));
        }
        let mut missing = DigestSet::builder();
        for digest in digests.iter() {
            if !self.bucket.exists(&self.key(digest)).await? {
                missing.add(digest.clone());
            }
        }
        Ok(missing.build())
    }
}
