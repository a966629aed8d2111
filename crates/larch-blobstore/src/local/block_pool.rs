//! Physical block storage behind the local engine.
//!
//! A pool hands out fixed-size blocks; the ring decides their lifecycle.
//! Blocks are reference counted through `Arc`: rotation drops the ring's
//! reference, but a block's physical storage is only recycled once the last
//! in-flight reader drops its handle. On file-backed pools this is why a
//! deployment configures spare blocks beyond the ring widths: writes can
//! proceed into spares while readers drain a released block.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use larch_buffer::Result;
use larch_buffer::StorageError;
use parking_lot::Mutex;
use parking_lot::RwLock;

/// A fixed-size region blobs are written into and read back from.
#[async_trait]
pub trait DataBlock: Send + Sync {
    async fn write_at(&self, offset_bytes: u64, data: Bytes) -> Result<()>;
    async fn read_at(&self, offset_bytes: u64, size_bytes: usize) -> Result<Bytes>;
}

/// Allocates unused blocks.
pub trait BlockPool: Send + Sync {
    /// Hand out an unused block of the pool's block size.
    ///
    /// A block's contents are unspecified until written; the engine never
    /// reads a range it has not written. Fails with `ResourceExhausted`
    /// when every physical block is still referenced.
    fn allocate(&self) -> Result<Arc<dyn DataBlock>>;
}

/// Blocks held in process memory.
pub struct MemoryBlockPool {
    block_size_bytes: u64,
}

impl MemoryBlockPool {
    pub fn new(block_size_bytes: u64) -> Self {
        Self { block_size_bytes }
    }
}

impl BlockPool for MemoryBlockPool {
    fn allocate(&self) -> Result<Arc<dyn DataBlock>> {
        Ok(Arc::new(MemoryBlock {
            data: RwLock::new(vec![0; self.block_size_bytes as usize]),
        }))
    }
}

struct MemoryBlock {
    data: RwLock<Vec<u8>>,
}

#[async_trait]
impl DataBlock for MemoryBlock {
    async fn write_at(&self, offset_bytes: u64, data: Bytes) -> Result<()> {
        let mut block = self.data.write();
        let start = offset_bytes as usize;
        let end = start + data.len();
        if end > block.len() {
            return Err(StorageError::invalid_argument("write past the end of a block"));
        }
        block[start..end].copy_from_slice(&data);
        Ok(())
    }

    async fn read_at(&self, offset_bytes: u64, size_bytes: usize) -> Result<Bytes> {
        let block = self.data.read();
        let start = offset_bytes as usize;
        let end = start + size_bytes;
        if end > block.len() {
            return Err(StorageError::invalid_argument("read past the end of a block"));
        }
        Ok(Bytes::copy_from_slice(&block[start..end]))
    }
}

/// Blocks carved out of one preallocated file or raw block device.
///
/// The file is partitioned into `block_count` equal regions. Free regions
/// sit on a free list; a handed-out block returns to the list when its last
/// reference is dropped.
pub struct FileBlockPool {
    file: Arc<File>,
    block_size_bytes: u64,
    free_offsets: Arc<Mutex<Vec<u64>>>,
}

impl FileBlockPool {
    pub fn new(file: File, block_size_bytes: u64, block_count: usize) -> Result<Self> {
        if block_size_bytes == 0 || block_count == 0 {
            return Err(StorageError::invalid_argument("block pool sizes must be positive"));
        }
        file.set_len(block_size_bytes * block_count as u64)?;
        let free_offsets = (0..block_count as u64).map(|i| i * block_size_bytes).rev().collect();
        Ok(Self {
            file: Arc::new(file),
            block_size_bytes,
            free_offsets: Arc::new(Mutex::new(free_offsets)),
        })
    }
}

impl BlockPool for FileBlockPool {
    fn allocate(&self) -> Result<Arc<dyn DataBlock>> {
        let base_offset = self
            .free_offsets
            .lock()
            .pop()
            .ok_or_else(|| StorageError::resource_exhausted("no spare blocks; readers still pin released blocks"))?;
        Ok(Arc::new(FileBlock {
            file: Arc::clone(&self.file),
            base_offset,
            block_size_bytes: self.block_size_bytes,
            free_offsets: Arc::clone(&self.free_offsets),
        }))
    }
}

struct FileBlock {
    file: Arc<File>,
    base_offset: u64,
    block_size_bytes: u64,
    free_offsets: Arc<Mutex<Vec<u64>>>,
}

impl FileBlock {
    fn check_bounds(&self, offset_bytes: u64, size_bytes: usize) -> Result<()> {
        if offset_bytes + size_bytes as u64 > self.block_size_bytes {
            return Err(StorageError::invalid_argument("access past the end of a block"));
        }
        Ok(())
    }
}

#[async_trait]
impl DataBlock for FileBlock {
    async fn write_at(&self, offset_bytes: u64, data: Bytes) -> Result<()> {
        self.check_bounds(offset_bytes, data.len())?;
        let file = Arc::clone(&self.file);
        let position = self.base_offset + offset_bytes;
        tokio::task::spawn_blocking(move || file.write_all_at(&data, position))
            .await
            .map_err(|e| StorageError::internal(format!("block write task failed: {e}")))??;
        Ok(())
    }

    async fn read_at(&self, offset_bytes: u64, size_bytes: usize) -> Result<Bytes> {
        self.check_bounds(offset_bytes, size_bytes)?;
        let file = Arc::clone(&self.file);
        let position = self.base_offset + offset_bytes;
        let data = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut data = vec![0; size_bytes];
            file.read_exact_at(&mut data, position)?;
            Ok(data)
        })
        .await
        .map_err(|e| StorageError::internal(format!("block read task failed: {e}")))??;
        Ok(Bytes::from(data))
    }
}

impl Drop for FileBlock {
    fn drop(&mut self) {
        // Recycle the region once the last handle is gone.
        self.free_offsets.lock().push(self.base_offset);
    }
}
