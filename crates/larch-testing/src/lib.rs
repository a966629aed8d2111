//! Shared fixtures for storage plane tests.
//!
//! Keeps digest arithmetic out of individual test bodies: a test that wants
//! "the blob `hello` and its digest" should not have to spell out SHA-256.

use bytes::Bytes;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::ChunkReader;
use larch_buffer::Result;
use larch_buffer::Validation;
use larch_digest::Digest;

use async_trait::async_trait;

/// The SHA-256 digest of `data` under the `test` instance.
pub fn cas_digest(data: &[u8]) -> Digest {
    cas_digest_for_instance("test", data)
}

/// The SHA-256 digest of `data` under a chosen instance.
pub fn cas_digest_for_instance(instance_name: &str, data: &[u8]) -> Digest {
    // Borrow a generator from a throwaway SHA-256 digest.
    let parent = Digest::new(instance_name, vec![0; 32], 0).expect("fixture digest");
    let mut generator = parent.new_generator();
    generator.update(data);
    generator.sum()
}

/// A blob and its digest.
pub fn cas_blob(data: &'static [u8]) -> (Digest, Bytes) {
    (cas_digest(data), Bytes::from_static(data))
}

/// A user-provided CAS buffer whose digest matches its contents.
pub fn cas_buffer(data: &'static [u8]) -> Buffer {
    Buffer::from_bytes(
        cas_digest(data),
        Validation::FullIntegrity,
        Bytes::from_static(data),
        BufferSource::user_provided(),
    )
}

/// A user-provided CAS buffer declaring `digest`, whether or not the
/// contents match. Used to exercise validation failures.
pub fn cas_buffer_for(digest: &Digest, data: &'static [u8]) -> Buffer {
    Buffer::from_bytes(
        digest.clone(),
        Validation::FullIntegrity,
        Bytes::from_static(data),
        BufferSource::user_provided(),
    )
}

/// An action-cache digest with a synthetic hash.
pub fn ac_digest(instance_name: &str, seed: u8, size_bytes: i64) -> Digest {
    Digest::new(instance_name, vec![seed; 32], size_bytes).expect("fixture digest")
}

/// An action-cache buffer declaring `digest` and holding `data`.
pub fn ac_buffer(digest: &Digest, data: &'static [u8]) -> Buffer {
    Buffer::from_bytes(
        digest.with_size_bytes(data.len() as i64),
        Validation::SizeOnly,
        Bytes::from_static(data),
        BufferSource::user_provided(),
    )
}

/// A reader that yields `data` split into fixed-size chunks.
///
/// Lets streaming paths be tested without a real backend behind them.
pub struct SlicedReader {
    data: Bytes,
    chunk_size: usize,
}

impl SlicedReader {
    pub fn new(data: Bytes, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self { data, chunk_size }
    }
}

#[async_trait]
impl ChunkReader for SlicedReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let take = self.chunk_size.min(self.data.len());
        Ok(Some(self.data.split_to(take)))
    }
}
