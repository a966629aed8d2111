//! The byte-stream currency between buffers and backends.

use async_trait::async_trait;
use bytes::Bytes;
use bytes::BytesMut;

use crate::error::Result;
use crate::error::StorageError;

/// A single-owner, pull-based stream of byte chunks.
///
/// `read_chunk` returns `Ok(None)` at end of stream. Implementations release
/// their underlying resources on drop, so abandoning a reader mid-stream is
/// always safe.
#[async_trait]
pub trait ChunkReader: Send {
    /// Read the next chunk, or `None` at end of stream.
    async fn read_chunk(&mut self) -> Result<Option<Bytes>>;
}

#[async_trait]
impl ChunkReader for Box<dyn ChunkReader> {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        (**self).read_chunk().await
    }
}

/// Serves a single in-memory chunk.
pub struct BytesReader {
    data: Option<Bytes>,
}

impl BytesReader {
    pub fn new(data: Bytes) -> Self {
        Self { data: Some(data) }
    }
}

#[async_trait]
impl ChunkReader for BytesReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.data.take().filter(|d| !d.is_empty()))
    }
}

/// Always reports a fixed error.
pub struct ErrorReader {
    error: StorageError,
}

impl ErrorReader {
    pub fn new(error: StorageError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl ChunkReader for ErrorReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        Err(self.error.clone())
    }
}

/// Drain a reader into a single contiguous byte slice.
///
/// A stream that consists of exactly one chunk is returned without copying.
pub async fn read_all(mut reader: impl ChunkReader, size_hint: usize) -> Result<Bytes> {
    let first = match reader.read_chunk().await? {
        Some(chunk) => chunk,
        None => return Ok(Bytes::new()),
    };
    let second = match reader.read_chunk().await? {
        Some(chunk) => chunk,
        None => return Ok(first),
    };
    let mut data = BytesMut::with_capacity(size_hint.max(first.len() + second.len()));
    data.extend_from_slice(&first);
    data.extend_from_slice(&second);
    while let Some(chunk) = reader.read_chunk().await? {
        data.extend_from_slice(&chunk);
    }
    Ok(data.freeze())
}
