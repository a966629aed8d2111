//! The rotating ring of data blocks.

use std::collections::VecDeque;
use std::sync::Arc;

use larch_buffer::Result;
use larch_buffer::StorageError;
use tracing::info;

use crate::local::block_pool::BlockPool;
use crate::local::block_pool::DataBlock;

/// Which ring a block currently sits in.
///
/// Blocks move strictly backwards through new → current → old as rotations
/// push fresh blocks onto the tail; a block's class is a function of its
/// position, not a stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingClass {
    /// Read-only; about to be released. Reads trigger a refresh.
    Old,
    /// Read-only; holds canonical data.
    Current,
    /// Accepts writes at the tail.
    New,
}

struct RingBlock {
    id: u64,
    block: Arc<dyn DataBlock>,
    write_offset_bytes: u64,
}

/// Ordered sequence of blocks partitioned into old / current / new spans.
///
/// Block ids increase monotonically and the ring always holds a contiguous
/// id range, so resolving an id to a block is array arithmetic. Rotation
/// appends one empty block and releases the oldest; the released block's
/// storage returns to the pool when the last reader handle drops.
pub(crate) struct BlockRing {
    pool: Arc<dyn BlockPool>,
    blocks: VecDeque<RingBlock>,
    old_count: usize,
    current_count: usize,
    block_size_bytes: u64,
    next_id: u64,
}

impl BlockRing {
    pub(crate) fn new(
        pool: Arc<dyn BlockPool>,
        block_size_bytes: u64,
        old_count: usize,
        current_count: usize,
        new_count: usize,
    ) -> Result<Self> {
        if block_size_bytes == 0 {
            return Err(StorageError::invalid_argument("block size must be positive"));
        }
        if new_count == 0 {
            return Err(StorageError::invalid_argument("at least one new block is required"));
        }
        let total = old_count + current_count + new_count;
        let mut blocks = VecDeque::with_capacity(total);
        for id in 0..total as u64 {
            blocks.push_back(RingBlock {
                id,
                block: pool.allocate()?,
                write_offset_bytes: 0,
            });
        }
        Ok(Self {
            pool,
            blocks,
            old_count,
            current_count,
            block_size_bytes,
            next_id: total as u64,
        })
    }

    fn front_id(&self) -> u64 {
        match self.blocks.front() {
            Some(front) => front.id,
            None => unreachable!("ring is never empty"),
        }
    }

    /// Whether `block_id` has not been released yet.
    pub(crate) fn contains(&self, block_id: u64) -> bool {
        block_id >= self.front_id() && block_id < self.next_id
    }

    /// Resolve a block id to a pinned handle and its current class.
    pub(crate) fn get_block(&self, block_id: u64) -> Option<(Arc<dyn DataBlock>, RingClass)> {
        if !self.contains(block_id) {
            return None;
        }
        let index = (block_id - self.front_id()) as usize;
        let class = if index < self.old_count {
            RingClass::Old
        } else if index < self.old_count + self.current_count {
            RingClass::Current
        } else {
            RingClass::New
        };
        Some((Arc::clone(&self.blocks[index].block), class))
    }

    /// Reserve `size_bytes` in the tail block, rotating first if it is full.
    pub(crate) fn allocate(&mut self, size_bytes: u64) -> Result<(u64, Arc<dyn DataBlock>, u64)> {
        if size_bytes > self.block_size_bytes {
            return Err(StorageError::invalid_argument(format!(
                "blob of {size_bytes} bytes does not fit a block of {} bytes",
                self.block_size_bytes
            )));
        }
        if self.tail_remaining() < size_bytes {
            self.rotate()?;
        }
        let tail = match self.blocks.back_mut() {
            Some(tail) => tail,
            None => unreachable!("ring is never empty"),
        };
        let offset = tail.write_offset_bytes;
        tail.write_offset_bytes += size_bytes;
        Ok((tail.id, Arc::clone(&tail.block), offset))
    }

    fn tail_remaining(&self) -> u64 {
        match self.blocks.back() {
            Some(tail) => self.block_size_bytes - tail.write_offset_bytes,
            None => unreachable!("ring is never empty"),
        }
    }

    /// Release the oldest block and append a fresh one.
    fn rotate(&mut self) -> Result<()> {
        // Allocate before releasing, so a pool failure leaves the ring
        // unchanged.
        let block = self.pool.allocate()?;
        let released = self.blocks.pop_front();
        self.blocks.push_back(RingBlock {
            id: self.next_id,
            block,
            write_offset_bytes: 0,
        });
        self.next_id += 1;
        if let Some(released) = released {
            info!(released_block = released.id, new_block = self.next_id - 1, "block ring rotated");
        }
        Ok(())
    }
}
