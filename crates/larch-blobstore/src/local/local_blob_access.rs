//! The local block-cycled storage engine.

use std::collections::HashMap;
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
use parking_lot::Mutex;
use sha2::Digest as _;
use sha2::Sha256;
use tracing::debug;
use tracing::warn;

use crate::blob_access::BlobAccess;
use crate::local::block_pool::BlockPool;
use crate::local::block_pool::DataBlock;
use crate::local::block_ring::BlockRing;
use crate::local::block_ring::RingClass;
use crate::local::digest_location_map::DigestLocationMap;
use crate::local::Location;
use crate::storage_kind::StorageKind;

/// Chunk size for streaming reads out of data blocks.
const READ_CHUNK_SIZE_BYTES: usize = 64 * 1024;

/// Sizing of a local engine.
#[derive(Debug, Clone)]
pub struct LocalBlobAccessConfig {
    pub block_size_bytes: u64,
    /// Ring widths; see [`RingClass`](crate::local::RingClass).
    pub old_blocks: usize,
    pub current_blocks: usize,
    pub new_blocks: usize,
    /// Slots in each digest-location map.
    pub digest_location_map_size: usize,
    pub max_get_attempts: u32,
    pub max_put_attempts: u32,
    /// Instance names served, for action-cache engines: the key space is
    /// per-instance, so each instance gets its own digest-location map.
    /// Ignored for content-addressed engines, whose keys omit the instance.
    pub instances: Vec<String>,
}

enum Index {
    Cas(DigestLocationMap),
    PerInstance(HashMap<String, DigestLocationMap>),
}

impl Index {
    fn map_for_instance_mut(&mut self, instance_name: &str) -> Result<&mut DigestLocationMap> {
        match self {
            Index::Cas(map) => Ok(map),
            Index::PerInstance(maps) => maps
                .get_mut(instance_name)
                .ok_or_else(|| StorageError::invalid_argument(format!("unknown instance '{instance_name}'"))),
        }
    }
}

struct EngineState {
    ring: BlockRing,
    index: Index,
}

/// Block-cycled storage over a memory or file block pool.
///
/// A digest-location map indexes blobs inside a rotating ring of fixed-size
/// blocks. Writes fill the tail block; full rings release their oldest
/// block, so space management is wholesale block recycling with no
/// free-list bookkeeping. A read that finds its blob in an *old* block
/// copies it forward into a new block first, so frequently read blobs
/// outlive cold ones written at the same time.
///
/// The index is a single in-memory structure under one lock (the map is
/// small and hot; finer locking buys nothing) and is not persisted: a
/// restart starts from an empty index, and the stale contents of the data
/// blocks are simply overwritten as writes refill the ring.
pub struct LocalBlobAccess {
    kind: StorageKind,
    block_size_bytes: u64,
    state: Arc<Mutex<EngineState>>,
}

impl LocalBlobAccess {
    pub fn new(kind: StorageKind, config: &LocalBlobAccessConfig, pool: Arc<dyn BlockPool>) -> Result<Self> {
        if config.digest_location_map_size == 0 || config.max_get_attempts == 0 || config.max_put_attempts == 0 {
            return Err(StorageError::invalid_argument(
                "digest-location map sizing must be positive",
            ));
        }
        let new_map =
            || DigestLocationMap::new(config.digest_location_map_size, config.max_get_attempts, config.max_put_attempts);
        let index = match kind {
            StorageKind::Cas => Index::Cas(new_map()),
            StorageKind::Ac => {
                if config.instances.is_empty() {
                    return Err(StorageError::invalid_argument(
                        "action-cache engines require at least one instance",
                    ));
                }
                Index::PerInstance(config.instances.iter().map(|i| (i.clone(), new_map())).collect())
            }
        };
        let ring = BlockRing::new(
            pool,
            config.block_size_bytes,
            config.old_blocks,
            config.current_blocks,
            config.new_blocks,
        )?;
        Ok(Self {
            kind,
            block_size_bytes: config.block_size_bytes,
            state: Arc::new(Mutex::new(EngineState { ring, index })),
        })
    }

    fn key_of(&self, digest: &Digest) -> [u8; 32] {
        Sha256::digest(self.kind.digest_key(digest).as_bytes()).into()
    }

    fn repair_source(&self, digest: &Digest, key: [u8; 32], location: Location) -> BufferSource {
        let state = Arc::clone(&self.state);
        let instance_name = digest.instance_name().to_string();
        BufferSource::reparable(move || async move {
            let mut state = state.lock();
            if let Ok(map) = state.index.map_for_instance_mut(&instance_name) {
                map.remove(&key, &location);
            }
            Ok(())
        })
    }

    /// Copy a blob read from an old block into a new block and repoint its
    /// index entry. Returns the new location.
    async fn refresh(&self, digest: &Digest, key: [u8; 32], data: Bytes) -> Result<Location> {
        let (block_id, block, offset_bytes) = {
            let mut state = self.state.lock();
            state.ring.allocate(data.len() as u64)?
        };
        let size_bytes = data.len() as i64;
        block.write_at(offset_bytes, data).await?;
        let location = Location {
            block_id,
            offset_bytes,
            size_bytes,
        };

        let mut state = self.state.lock();
        let EngineState { ring, index } = &mut *state;
        let map = index.map_for_instance_mut(digest.instance_name())?;
        map.put(key, location, |location| ring.contains(location.block_id));
        debug!(%digest, block_id, "blob refreshed into a new block");
        Ok(location)
    }
}

#[async_trait]
impl BlobAccess for LocalBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let key = self.key_of(digest);
        let (block, class, location) = {
            let mut state = self.state.lock();
            let EngineState { ring, index } = &mut *state;
            let map = match index.map_for_instance_mut(digest.instance_name()) {
                Ok(map) => map,
                Err(e) => return Buffer::from_error(e),
            };
            let location = match map.get(&key, |location| ring.contains(location.block_id)) {
                Some(location) => location,
                None => return Buffer::from_error(StorageError::not_found(self.kind.digest_key(digest))),
            };
            match ring.get_block(location.block_id) {
                Some((block, class)) => (block, class, location),
                None => return Buffer::from_error(StorageError::not_found(self.kind.digest_key(digest))),
            }
        };

        if class == RingClass::Old {
            // About to be released: serve the bytes and migrate them into a
            // new block so a blob that is still read survives the rotation.
            let data = match block.read_at(location.offset_bytes, location.size_bytes as usize).await {
                Ok(data) => data,
                Err(e) => return Buffer::from_error(e),
            };
            // Point the repair hook at wherever the index entry ends up, so
            // corruption discovered by the consumer removes the live entry.
            let served_location = match self.refresh(digest, key, data.clone()).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    // The caller still gets their bytes; the blob just stays
                    // in the old block until it is released.
                    warn!(%digest, error = %e, "failed to refresh blob out of an old block");
                    location
                }
            };
            return self
                .kind
                .new_buffer_from_bytes(digest, data, self.repair_source(digest, key, served_location));
        }

        self.kind.new_buffer_from_reader(
            digest,
            location.size_bytes,
            Box::new(BlockChunkReader {
                block,
                offset_bytes: location.offset_bytes,
                remaining_bytes: location.size_bytes as usize,
            }),
            self.repair_source(digest, key, location),
        )
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        let max_size = buffer.declared_size().unwrap_or(digest.size_bytes()).max(0) as usize;
        let data = buffer.into_bytes(max_size).await?;
        if data.len() as u64 > self.block_size_bytes {
            return Err(StorageError::invalid_argument(format!(
                "blob of {} bytes does not fit a block of {} bytes",
                data.len(),
                self.block_size_bytes
            )));
        }
        let key = self.key_of(digest);
        let size_bytes = data.len() as i64;

        let (block_id, block, offset_bytes) = {
            let mut state = self.state.lock();
            state.ring.allocate(data.len() as u64)?
        };
        block.write_at(offset_bytes, data).await?;

        // The index entry only appears after the bytes are durable in the
        // block, so a failed write leaves nothing visible.
        let mut state = self.state.lock();
        let EngineState { ring, index } = &mut *state;
        let map = index.map_for_instance_mut(digest.instance_name())?;
        map.put(
            key,
            Location {
                block_id,
                offset_bytes,
                size_bytes,
            },
            |location| ring.contains(location.block_id),
        );
        Ok(())
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        if self.kind == StorageKind::Ac {
            return Err(StorageError::unimplemented(
                "action-cache backends do not support find_missing",
            ));
        }
        let mut state = self.state.lock();
        let EngineState { ring, index } = &mut *state;
        let mut missing = DigestSet::builder();
        for digest in digests.iter() {
            let map = index.map_for_instance_mut(digest.instance_name())?;
            let key = Sha256::digest(self.kind.digest_key(digest).as_bytes()).into();
            if map.get(&key, |location| ring.contains(location.block_id)).is_none() {
                missing.add(digest.clone());
            }
        }
        Ok(missing.build())
    }
}

/// Streams a blob out of a pinned block.
struct BlockChunkReader {
    block: Arc<dyn DataBlock>,
    offset_bytes: u64,
    remaining_bytes: usize,
}

#[async_trait]
impl ChunkReader for BlockChunkReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.remaining_bytes == 0 {
            return Ok(None);
        }
        let size = self.remaining_bytes.min(READ_CHUNK_SIZE_BYTES);
        let chunk = self.block.read_at(self.offset_bytes, size).await?;
        self.offset_bytes += size as u64;
        self.remaining_bytes -= size;
        Ok(Some(chunk))
    }
}
