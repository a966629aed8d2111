//! Circular on-disk storage.
//!
//! A directory holding three files:
//!
//! - `data`: a byte ring of configured size; blobs are appended at a
//!   monotonically increasing cursor and wrap around the end. Old entries
//!   are never deleted, only overwritten by the advancing cursor.
//! - `offset`: a fixed table of slots mapping a hashed digest key to the
//!   cursor range holding its contents. Colliding keys overwrite each
//!   other's slots; the ring is a cache, not an archive.
//! - `state`: the allocation frontier. Space is claimed in chunks of the
//!   configured allocation size and the frontier is persisted before any
//!   data is written behind it, which bounds state-file writes and lets a
//!   restart resume at a safely unused cursor.

use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::Result;
use larch_buffer::StorageError;
use larch_digest::Digest;
use larch_digest::DigestSet;
use sha2::Digest as _;
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;

use crate::blob_access::BlobAccess;
use crate::hashing::fnv1a64;
use crate::storage_kind::StorageKind;

// Slot layout: 32-byte key hash, little-endian offset and length.
const SLOT_SIZE: u64 = 48;

/// Sizing of a circular store.
#[derive(Debug, Clone, Copy)]
pub struct CircularConfig {
    /// Number of slots in the offset table.
    pub offset_slots: u64,
    /// Size of the data ring in bytes.
    pub data_size_bytes: u64,
    /// Granularity of cursor persistence.
    pub allocation_chunk_size_bytes: u64,
}

struct CircularState {
    offset_file: File,
    data_file: File,
    state_file: File,
    /// Next byte to write, monotonically increasing across the ring.
    write_cursor: u64,
    /// Cursor value persisted to the state file; always >= `write_cursor`
    /// rounded up to the allocation chunk.
    persisted_frontier: u64,
}

/// Stores blobs in a circular file pair.
pub struct CircularBlobAccess {
    kind: StorageKind,
    config: CircularConfig,
    state: Arc<Mutex<CircularState>>,
}

impl CircularBlobAccess {
    /// Open (or create) a circular store in `directory`.
    pub async fn open(directory: &Path, kind: StorageKind, config: CircularConfig) -> Result<Self> {
        if config.offset_slots == 0 || config.data_size_bytes == 0 || config.allocation_chunk_size_bytes == 0 {
            return Err(StorageError::invalid_argument(
                "circular storage sizes must all be positive",
            ));
        }
        let open = |name: &str| -> Result<File> {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(directory.join(name))
                .map_err(StorageError::from)
        };
        let offset_file = open("offset")?;
        offset_file.set_len(config.offset_slots * SLOT_SIZE)?;
        let data_file = open("data")?;
        let state_file = open("state")?;

        let mut frontier_bytes = [0u8; 8];
        let persisted_frontier = match state_file.read_exact_at(&mut frontier_bytes, 0) {
            Ok(()) => u64::from_le_bytes(frontier_bytes),
            // Fresh store; the state file is still empty.
            Err(_) => 0,
        };
        info!(
            directory = %directory.display(),
            cursor = persisted_frontier,
            "circular storage opened"
        );

        Ok(Self {
            kind,
            config,
            state: Arc::new(Mutex::new(CircularState {
                offset_file,
                data_file,
                state_file,
                write_cursor: persisted_frontier,
                persisted_frontier,
            })),
        })
    }

    fn key_hash(&self, digest: &Digest) -> [u8; 32] {
        Sha256::digest(self.kind.digest_key(digest).as_bytes()).into()
    }

    fn slot_position(&self, key_hash: &[u8; 32]) -> u64 {
        (fnv1a64(0, key_hash) % self.config.offset_slots) * SLOT_SIZE
    }

    /// Whether a recorded cursor range still holds readable data.
    fn entry_is_live(&self, offset: u64, length: u64, write_cursor: u64) -> bool {
        length <= self.config.data_size_bytes
            && offset.checked_add(length).is_some_and(|end| end <= write_cursor)
            && offset >= write_cursor.saturating_sub(self.config.data_size_bytes)
    }

    fn read_slot(&self, state: &CircularState, key_hash: &[u8; 32]) -> Result<Option<(u64, u64)>> {
        let mut slot = [0u8; SLOT_SIZE as usize];
        state.offset_file.read_exact_at(&mut slot, self.slot_position(key_hash))?;
        if slot[..32] != key_hash[..] {
            return Ok(None);
        }
        let offset = u64::from_le_bytes(slot[32..40].try_into().expect("slot layout"));
        let length = u64::from_le_bytes(slot[40..48].try_into().expect("slot layout"));
        Ok(Some((offset, length)))
    }

    fn write_slot(&self, state: &CircularState, key_hash: &[u8; 32], offset: u64, length: u64) -> Result<()> {
        let mut slot = [0u8; SLOT_SIZE as usize];
        slot[..32].copy_from_slice(key_hash);
        slot[32..40].copy_from_slice(&offset.to_le_bytes());
        slot[40..48].copy_from_slice(&length.to_le_bytes());
        state.offset_file.write_all_at(&slot, self.slot_position(key_hash))?;
        Ok(())
    }

    fn clear_slot(state: &CircularState, position: u64) -> Result<()> {
        state.offset_file.write_all_at(&[0u8; SLOT_SIZE as usize], position)?;
        Ok(())
    }

    fn read_ring(&self, state: &CircularState, offset: u64, length: u64) -> Result<Bytes> {
        let mut data = vec![0u8; length as usize];
        let position = offset % self.config.data_size_bytes;
        let first = ((self.config.data_size_bytes - position) as usize).min(data.len());
        state.data_file.read_exact_at(&mut data[..first], position)?;
        if first < data.len() {
            state.data_file.read_exact_at(&mut data[first..], 0)?;
        }
        Ok(Bytes::from(data))
    }

    fn write_ring(&self, state: &CircularState, offset: u64, data: &[u8]) -> Result<()> {
        let position = offset % self.config.data_size_bytes;
        let first = ((self.config.data_size_bytes - position) as usize).min(data.len());
        state.data_file.write_all_at(&data[..first], position)?;
        if first < data.len() {
            state.data_file.write_all_at(&data[first..], 0)?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobAccess for CircularBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let key_hash = self.key_hash(digest);
        let state = self.state.lock().await;
        let (offset, length) = match self.read_slot(&state, &key_hash) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Buffer::from_error(StorageError::not_found(self.kind.digest_key(digest))),
            Err(e) => return Buffer::from_error(e),
        };
        if !self.entry_is_live(offset, length, state.write_cursor) {
            // Overwritten by the advancing cursor.
            return Buffer::from_error(StorageError::not_found(self.kind.digest_key(digest)));
        }
        let data = match self.read_ring(&state, offset, length) {
            Ok(data) => data,
            Err(e) => return Buffer::from_error(e),
        };
        drop(state);

        let shared_state = Arc::clone(&self.state);
        let slot_position = self.slot_position(&key_hash);
        self.kind.new_buffer_from_bytes(
            digest,
            data,
            BufferSource::reparable(move || async move {
                let state = shared_state.lock().await;
                Self::clear_slot(&state, slot_position)
            }),
        )
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        let max_size = buffer.declared_size().unwrap_or(digest.size_bytes()).max(0) as usize;
        let data = buffer.into_bytes(max_size).await?;
        if data.len() as u64 > self.config.data_size_bytes {
            return Err(StorageError::invalid_argument(format!(
                "blob of {} bytes does not fit a data file of {} bytes",
                data.len(),
                self.config.data_size_bytes
            )));
        }
        let key_hash = self.key_hash(digest);

        let mut state = self.state.lock().await;
        let offset = state.write_cursor;
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| StorageError::resource_exhausted("write cursor overflow"))?;

        // Persist the allocation frontier before writing behind it, so a
        // restart never reuses a cursor range that may hold data.
        if end > state.persisted_frontier {
            let chunk = self.config.allocation_chunk_size_bytes;
            let frontier = end.div_ceil(chunk) * chunk;
            state.state_file.write_all_at(&frontier.to_le_bytes(), 0)?;
            state.persisted_frontier = frontier;
        }

        self.write_ring(&state, offset, &data)?;
        state.write_cursor = end;
        self.write_slot(&state, &key_hash, offset, data.len() as u64)?;
        debug!(%digest, offset, "blob stored in circular storage");
        Ok(())
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        if self.kind == StorageKind::Ac {
            return Err(StorageError::unimplemented(
                "action-cache backends do not support find_missing",
            ));
        }
        let state = self.state.lock().await;
        let mut missing = DigestSet::builder();
        for digest in digests.iter() {
            let live = match self.read_slot(&state, &self.key_hash(digest))? {
                Some((offset, length)) => self.entry_is_live(offset, length, state.write_cursor),
                None => false,
            };
            if !live {
                missing.add(digest.clone());
            }
        }
        Ok(missing.build())
    }
}

#[cfg(test)]
mod tests {
    use larch_buffer::ErrorCode;
    use larch_testing::cas_blob;
    use larch_testing::cas_buffer;

    use super::*;

    fn small_config() -> CircularConfig {
        CircularConfig {
            offset_slots: 256,
            data_size_bytes: 64,
            allocation_chunk_size_bytes: 16,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CircularBlobAccess::open(dir.path(), StorageKind::Cas, small_config())
            .await
            .unwrap();
        let (digest, data) = cas_blob(b"hello");

        storage.put(&digest, cas_buffer(b"hello")).await.unwrap();
        assert_eq!(storage.get(&digest).await.into_bytes(1024).await.unwrap(), data);
    }

    #[tokio::test]
    async fn old_entries_are_overwritten_by_the_ring() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CircularBlobAccess::open(dir.path(), StorageKind::Cas, small_config())
            .await
            .unwrap();

        let (first, _) = cas_blob(b"the first blob, 24 bytes");
        storage.put(&first, cas_buffer(b"the first blob, 24 bytes")).await.unwrap();

        // Push the cursor a full ring past the first entry.
        for data in [&b"filler one, much filler."[..], b"filler two, more filler.", b"filler three, filler too"] {
            let digest = larch_testing::cas_digest(data);
            let buffer = Buffer::from_bytes(
                digest.clone(),
                larch_buffer::Validation::FullIntegrity,
                Bytes::copy_from_slice(data),
                BufferSource::user_provided(),
            );
            storage.put(&digest, buffer).await.unwrap();
        }

        let buffer = storage.get(&first).await;
        assert_eq!(buffer.as_error().map(|e| e.code()), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn reopened_store_still_serves_recent_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (digest, data) = cas_blob(b"hello");
        {
            let storage = CircularBlobAccess::open(dir.path(), StorageKind::Cas, small_config())
                .await
                .unwrap();
            storage.put(&digest, cas_buffer(b"hello")).await.unwrap();
        }
        let storage = CircularBlobAccess::open(dir.path(), StorageKind::Cas, small_config())
            .await
            .unwrap();
        assert_eq!(storage.get(&digest).await.into_bytes(1024).await.unwrap(), data);
    }

    #[tokio::test]
    async fn oversized_blob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CircularBlobAccess::open(dir.path(), StorageKind::Cas, small_config())
            .await
            .unwrap();
        const DATA: &[u8] = &[0x61; 80];
        let data = DATA;
        let digest = larch_testing::cas_digest(data);
        let err = storage
            .put(&digest, larch_testing::cas_buffer_for(&digest, data))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn find_missing_sees_overwritten_entries_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CircularBlobAccess::open(dir.path(), StorageKind::Cas, small_config())
            .await
            .unwrap();
        let (digest, _) = cas_blob(b"hello");
        storage.put(&digest, cas_buffer(b"hello")).await.unwrap();

        let missing = storage.find_missing([digest.clone()].into_iter().collect()).await.unwrap();
        assert!(missing.is_empty());

        for data in [&b"filler one, much filler."[..], b"filler two, more filler.", b"filler three, filler too"] {
            let filler = larch_testing::cas_digest(data);
            let buffer = Buffer::from_bytes(
                filler.clone(),
                larch_buffer::Validation::FullIntegrity,
                Bytes::copy_from_slice(data),
                BufferSource::user_provided(),
            );
            storage.put(&filler, buffer).await.unwrap();
        }

        let missing = storage.find_missing([digest.clone()].into_iter().collect()).await.unwrap();
        assert!(missing.contains(&digest));
    }
}
