//! The [`Buffer`] type and its terminal operations.

use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;
use larch_digest::Digest;
use larch_digest::DigestGenerator;

use crate::chunk_reader::read_all;
use crate::chunk_reader::BytesReader;
use crate::chunk_reader::ChunkReader;
use crate::chunk_reader::ErrorReader;
use crate::error::Result;
use crate::error::StorageError;
use crate::source::BufferSource;
use crate::source::RepairHandle;
use crate::tee::tee_reader;

use async_trait::async_trait;

/// How a buffer's contents are checked against its declared digest.
///
/// Content-addressed blobs are self-verifying: the full hash is recomputed
/// while streaming and compared at end of stream. Action-cache payloads are
/// opaque, so only the declared length can be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Recompute the hash while streaming; compare hash and size at EOF.
    FullIntegrity,
    /// Compare only the size at EOF.
    SizeOnly,
}

/// Size window for `clone_stream`.
///
/// One side of a split stream may run ahead of the other by at most this
/// many buffered bytes; past that, the lagging side is failed so that a
/// stalled consumer cannot pin unbounded memory.
pub const CLONE_STREAM_WINDOW_BYTES: usize = 4 << 20;

enum Inner {
    Bytes(Bytes),
    Reader(Box<dyn ChunkReader>),
    Error(StorageError),
}

/// A one-shot stream of a blob's bytes, tagged with the digest it claims to
/// represent.
///
/// A buffer is consumed by exactly one terminal operation; ownership makes a
/// second consumption unrepresentable. Errors, including integrity failures
/// discovered mid-stream, are embedded and surface at consumption time, so
/// `BlobAccess::get` itself never fails.
pub struct Buffer {
    digest: Option<Digest>,
    validation: Validation,
    repair: RepairHandle,
    inner: Inner,
}

impl Buffer {
    fn new(digest: Digest, validation: Validation, inner: Inner, repair: RepairHandle) -> Self {
        Self {
            digest: Some(digest),
            validation,
            repair,
            inner,
        }
    }

    /// A buffer backed by an in-memory byte slice.
    pub fn from_bytes(digest: Digest, validation: Validation, data: Bytes, source: BufferSource) -> Self {
        Self::new(digest, validation, Inner::Bytes(data), source.into_repair_handle())
    }

    /// A buffer that streams from a reader on consumption.
    pub fn from_reader(
        digest: Digest,
        validation: Validation,
        reader: Box<dyn ChunkReader>,
        source: BufferSource,
    ) -> Self {
        Self::new(digest, validation, Inner::Reader(reader), source.into_repair_handle())
    }

    /// A buffer holding an encoded protobuf message.
    pub fn from_proto<M: prost::Message>(
        digest: Digest,
        validation: Validation,
        message: &M,
        source: BufferSource,
    ) -> Self {
        let data = Bytes::from(message.encode_to_vec());
        Self::from_bytes(digest, validation, data, source)
    }

    /// A buffer that yields a fixed error on consumption.
    pub fn from_error(error: StorageError) -> Self {
        Self {
            digest: None,
            validation: Validation::SizeOnly,
            repair: RepairHandle::new(None),
            inner: Inner::Error(error),
        }
    }

    /// The digest this buffer claims to represent, if it has one.
    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// The declared size in bytes, if known.
    pub fn declared_size(&self) -> Option<i64> {
        self.digest.as_ref().map(|d| d.size_bytes())
    }

    /// The embedded error, when this buffer was created from one.
    ///
    /// Backends surface lookup failures as error buffers, so decorators can
    /// inspect this without consuming the stream (e.g. mirrored fallback on
    /// `NotFound`).
    pub fn as_error(&self) -> Option<&StorageError> {
        match &self.inner {
            Inner::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Terminal: materialize the whole blob.
    ///
    /// Fails with `InvalidArgument` before any read when the declared size
    /// exceeds `max_size_bytes`.
    pub async fn into_bytes(self, max_size_bytes: usize) -> Result<Bytes> {
        if let Some(size) = self.declared_size() {
            if size > max_size_bytes as i64 {
                return Err(StorageError::invalid_argument(format!(
                    "buffer of size {size} exceeds maximum of {max_size_bytes} bytes"
                )));
            }
        }
        let capacity = self.declared_size().unwrap_or(0) as usize;
        let reader = self.into_reader();
        read_all(reader, capacity).await
    }

    /// Terminal: materialize and decode a protobuf message.
    pub async fn into_proto<M: prost::Message + Default>(self, max_size_bytes: usize) -> Result<M> {
        let data = self.into_bytes(max_size_bytes).await?;
        M::decode(data).map_err(|e| StorageError::invalid_argument(format!("failed to decode message: {e}")))
    }

    /// Terminal: stream the whole blob as validated chunks.
    pub fn into_reader(self) -> Box<dyn ChunkReader> {
        let inner: Box<dyn ChunkReader> = match self.inner {
            Inner::Bytes(data) => Box::new(BytesReader::new(data)),
            Inner::Reader(reader) => reader,
            Inner::Error(error) => return Box::new(ErrorReader::new(error)),
        };
        let digest = match self.digest {
            Some(digest) => digest,
            // Unreachable: non-error buffers always carry a digest.
            None => return Box::new(ErrorReader::new(StorageError::internal("buffer has no digest"))),
        };
        Box::new(ValidatingReader::new(digest, self.validation, inner, self.repair))
    }

    /// Terminal: stream a byte range of the blob in fixed-size chunks.
    ///
    /// The full underlying stream is still validated; the caller only sees
    /// bytes from `offset_bytes` on, re-chunked into `chunk_size_bytes`
    /// pieces.
    pub fn into_chunk_reader(self, offset_bytes: u64, chunk_size_bytes: usize) -> Box<dyn ChunkReader> {
        if chunk_size_bytes == 0 {
            return Box::new(ErrorReader::new(StorageError::invalid_argument("chunk size must be positive")));
        }
        if let Some(size) = self.declared_size() {
            if offset_bytes > size as u64 {
                return Box::new(ErrorReader::new(StorageError::invalid_argument(format!(
                    "offset {offset_bytes} exceeds blob size {size}"
                ))));
            }
        }
        Box::new(SkipRechunkReader {
            inner: self.into_reader(),
            skip_remaining: offset_bytes,
            chunk_size: chunk_size_bytes,
            pending: BytesMut::new(),
            eof: false,
        })
    }

    /// Terminal: materialize once and hand out two identical buffers.
    pub async fn clone_copy(self, max_size_bytes: usize) -> (Buffer, Buffer) {
        let digest = self.digest.clone();
        let validation = self.validation;
        match self.into_bytes(max_size_bytes).await {
            Ok(data) => match digest {
                Some(digest) => {
                    let repair = RepairHandle::new(None);
                    (
                        Buffer::new(digest.clone(), validation, Inner::Bytes(data.clone()), repair.clone()),
                        Buffer::new(digest, validation, Inner::Bytes(data), repair),
                    )
                }
                None => {
                    let error = StorageError::internal("buffer has no digest");
                    (Buffer::from_error(error.clone()), Buffer::from_error(error))
                }
            },
            Err(error) => (Buffer::from_error(error.clone()), Buffer::from_error(error)),
        }
    }

    /// Terminal: split into two independently consumable buffers.
    ///
    /// Backed by a bounded tee; see [`CLONE_STREAM_WINDOW_BYTES`].
    pub fn clone_stream(self) -> (Buffer, Buffer) {
        self.clone_stream_with_window(CLONE_STREAM_WINDOW_BYTES)
    }

    pub(crate) fn clone_stream_with_window(self, window_bytes: usize) -> (Buffer, Buffer) {
        match self.inner {
            Inner::Error(error) => (Buffer::from_error(error.clone()), Buffer::from_error(error)),
            Inner::Bytes(data) => match self.digest {
                Some(digest) => (
                    Buffer::new(
                        digest.clone(),
                        self.validation,
                        Inner::Bytes(data.clone()),
                        self.repair.clone(),
                    ),
                    Buffer::new(digest, self.validation, Inner::Bytes(data), self.repair),
                ),
                None => {
                    let error = StorageError::internal("buffer has no digest");
                    (Buffer::from_error(error.clone()), Buffer::from_error(error))
                }
            },
            Inner::Reader(reader) => match self.digest {
                Some(digest) => {
                    let (left, right) = tee_reader(reader, window_bytes);
                    (
                        Buffer::new(
                            digest.clone(),
                            self.validation,
                            Inner::Reader(Box::new(left)),
                            self.repair.clone(),
                        ),
                        Buffer::new(digest, self.validation, Inner::Reader(Box::new(right)), self.repair),
                    )
                }
                None => {
                    let error = StorageError::internal("buffer has no digest");
                    (Buffer::from_error(error.clone()), Buffer::from_error(error))
                }
            },
        }
    }

    /// Terminal: release the buffer without reading it.
    pub fn discard(self) {
        drop(self);
    }
}

enum ReaderState {
    Streaming,
    Finished,
    Failed(StorageError),
}

/// Wraps a chunk stream with digest validation.
///
/// The declared size bound is enforced while streaming; the hash comparison
/// happens at end of stream. On an integrity violation the buffer's repair
/// hook fires and every subsequent read observes the same `Internal` error.
struct ValidatingReader {
    digest: Digest,
    inner: Box<dyn ChunkReader>,
    repair: RepairHandle,
    generator: Option<DigestGenerator>,
    bytes_seen: i64,
    state: ReaderState,
}

impl ValidatingReader {
    fn new(digest: Digest, validation: Validation, inner: Box<dyn ChunkReader>, repair: RepairHandle) -> Self {
        let generator = match validation {
            Validation::FullIntegrity => Some(digest.new_generator()),
            Validation::SizeOnly => None,
        };
        Self {
            digest,
            inner,
            repair,
            generator,
            bytes_seen: 0,
            state: ReaderState::Streaming,
        }
    }

    async fn integrity_failure(&mut self, message: String) -> StorageError {
        self.repair.fire().await;
        let error = StorageError::internal(message);
        self.state = ReaderState::Failed(error.clone());
        error
    }
}

#[async_trait]
impl ChunkReader for ValidatingReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        match &self.state {
            ReaderState::Failed(error) => return Err(error.clone()),
            ReaderState::Finished => return Ok(None),
            ReaderState::Streaming => {}
        }
        match self.inner.read_chunk().await {
            Err(error) => {
                self.state = ReaderState::Failed(error.clone());
                Err(error)
            }
            Ok(Some(chunk)) => {
                self.bytes_seen += chunk.len() as i64;
                if let Some(generator) = &mut self.generator {
                    generator.update(&chunk);
                }
                if self.bytes_seen > self.digest.size_bytes() {
                    let message = format!(
                        "blob {} is longer than its declared size of {} bytes",
                        self.digest,
                        self.digest.size_bytes()
                    );
                    return Err(self.integrity_failure(message).await);
                }
                Ok(Some(chunk))
            }
            Ok(None) => {
                if self.bytes_seen != self.digest.size_bytes() {
                    let message = format!(
                        "blob {} has size {}, while {} bytes were expected",
                        self.digest,
                        self.bytes_seen,
                        self.digest.size_bytes()
                    );
                    return Err(self.integrity_failure(message).await);
                }
                if let Some(generator) = self.generator.take() {
                    let actual = generator.sum();
                    if actual.hash() != self.digest.hash() {
                        let message = format!(
                            "blob {} has hash {}, while {} was expected",
                            self.digest,
                            actual.hash_hex(),
                            self.digest.hash_hex()
                        );
                        return Err(self.integrity_failure(message).await);
                    }
                }
                self.state = ReaderState::Finished;
                Ok(None)
            }
        }
    }
}

/// Skips a prefix of a stream and re-chunks the remainder.
struct SkipRechunkReader {
    inner: Box<dyn ChunkReader>,
    skip_remaining: u64,
    chunk_size: usize,
    pending: BytesMut,
    eof: bool,
}

#[async_trait]
impl ChunkReader for SkipRechunkReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.pending.len() >= self.chunk_size {
                return Ok(Some(self.pending.split_to(self.chunk_size).freeze()));
            }
            if self.eof {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.pending.split().freeze()));
            }
            match self.inner.read_chunk().await? {
                None => self.eof = true,
                Some(mut chunk) => {
                    if self.skip_remaining > 0 {
                        let skipped = (self.skip_remaining).min(chunk.len() as u64) as usize;
                        chunk.advance(skipped);
                        self.skip_remaining -= skipped as u64;
                    }
                    if !chunk.is_empty() {
                        self.pending.extend_from_slice(&chunk);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use prost::Message;

    use crate::error::ErrorCode;

    use super::*;

    fn digest_of(instance: &str, data: &[u8]) -> Digest {
        // Borrow a generator from a throwaway SHA-256 digest.
        let parent = Digest::new(instance, vec![0; 32], 0).unwrap();
        let mut generator = parent.new_generator();
        generator.update(data);
        generator.sum()
    }

    fn cas_buffer(data: &'static [u8]) -> Buffer {
        Buffer::from_bytes(
            digest_of("test", data),
            Validation::FullIntegrity,
            Bytes::from_static(data),
            BufferSource::user_provided(),
        )
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct TestMessage {
        #[prost(string, tag = "1")]
        name: String,
        #[prost(int64, tag = "2")]
        value: i64,
    }

    #[tokio::test]
    async fn valid_cas_buffer_round_trips() {
        let data = cas_buffer(b"hello").into_bytes(1024).await.unwrap();
        assert_eq!(data, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn corrupt_cas_buffer_fails_and_repairs_once() {
        let repairs = Arc::new(AtomicUsize::new(0));
        let repairs_in_hook = Arc::clone(&repairs);
        let buffer = Buffer::from_bytes(
            digest_of("test", b"hello"),
            Validation::FullIntegrity,
            Bytes::from_static(b"jello"),
            BufferSource::reparable(move || {
                repairs_in_hook.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        );

        let err = buffer.into_bytes(1024).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(repairs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_stream_is_an_integrity_failure() {
        let buffer = Buffer::from_bytes(
            digest_of("test", b"hello"),
            Validation::FullIntegrity,
            Bytes::from_static(b"hello, but longer"),
            BufferSource::irreparable(),
        );
        let err = buffer.into_bytes(1024).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[tokio::test]
    async fn size_only_buffer_skips_hash_validation() {
        // Declared digest hash is wrong for the contents; only the size has
        // to line up for an action-cache payload.
        let digest = Digest::new("test", vec![0x11; 32], 5).unwrap();
        let buffer = Buffer::from_bytes(
            digest,
            Validation::SizeOnly,
            Bytes::from_static(b"hello"),
            BufferSource::irreparable(),
        );
        assert_eq!(buffer.into_bytes(1024).await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn size_only_buffer_still_checks_size() {
        let digest = Digest::new("test", vec![0x11; 32], 3).unwrap();
        let buffer = Buffer::from_bytes(
            digest,
            Validation::SizeOnly,
            Bytes::from_static(b"hello"),
            BufferSource::irreparable(),
        );
        assert_eq!(buffer.into_bytes(1024).await.unwrap_err().code(), ErrorCode::Internal);
    }

    #[tokio::test]
    async fn size_limit_is_enforced_before_reading() {
        let digest = digest_of("test", b"hello");
        let buffer = Buffer::from_reader(
            digest,
            Validation::FullIntegrity,
            Box::new(ErrorReader::new(StorageError::unavailable("must not be read"))),
            BufferSource::irreparable(),
        );
        // The declared size (5) exceeds the limit, so the reader is never
        // touched and the error class is InvalidArgument, not Unavailable.
        let err = buffer.into_bytes(3).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn error_buffer_surfaces_its_error() {
        let buffer = Buffer::from_error(StorageError::not_found("no such blob"));
        assert_eq!(buffer.as_error().map(|e| e.code()), Some(ErrorCode::NotFound));
        assert_eq!(buffer.into_bytes(1024).await.unwrap_err().code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn chunk_reader_honors_offset_and_chunk_size() {
        let mut reader = cas_buffer(b"abcdefghij").into_chunk_reader(3, 4);
        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from_static(b"defg")));
        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from_static(b"hij")));
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn chunk_reader_rejects_offset_past_the_end() {
        let mut reader = cas_buffer(b"abc").into_chunk_reader(4, 2);
        assert_eq!(reader.read_chunk().await.unwrap_err().code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn clone_copy_yields_two_identical_buffers() {
        let (left, right) = cas_buffer(b"hello").clone_copy(1024).await;
        assert_eq!(left.into_bytes(1024).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(right.into_bytes(1024).await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn clone_copy_of_corrupt_buffer_fails_both_sides() {
        let buffer = Buffer::from_bytes(
            digest_of("test", b"hello"),
            Validation::FullIntegrity,
            Bytes::from_static(b"wrong"),
            BufferSource::irreparable(),
        );
        let (left, right) = buffer.clone_copy(1024).await;
        assert_eq!(left.into_bytes(1024).await.unwrap_err().code(), ErrorCode::Internal);
        assert_eq!(right.into_bytes(1024).await.unwrap_err().code(), ErrorCode::Internal);
    }

    #[tokio::test]
    async fn clone_stream_of_byte_buffer_serves_both_sides() {
        let (left, right) = cas_buffer(b"hello").clone_stream();
        assert_eq!(left.into_bytes(1024).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(right.into_bytes(1024).await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn clone_stream_repairs_at_most_once() {
        let repairs = Arc::new(AtomicUsize::new(0));
        let repairs_in_hook = Arc::clone(&repairs);
        let buffer = Buffer::from_bytes(
            digest_of("test", b"hello"),
            Validation::FullIntegrity,
            Bytes::from_static(b"wrong"),
            BufferSource::reparable(move || {
                repairs_in_hook.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        );

        let (left, right) = buffer.clone_stream();
        assert!(left.into_bytes(1024).await.is_err());
        assert!(right.into_bytes(1024).await.is_err());
        assert_eq!(repairs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn proto_round_trip() {
        let message = TestMessage {
            name: "build".to_string(),
            value: 42,
        };
        let encoded = message.encode_to_vec();
        let digest = digest_of("test", &encoded);
        let buffer = Buffer::from_proto(
            digest,
            Validation::FullIntegrity,
            &message,
            BufferSource::user_provided(),
        );
        let decoded: TestMessage = buffer.into_proto(1024).await.unwrap();
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn discard_releases_without_reading() {
        cas_buffer(b"hello").discard();
    }
}
