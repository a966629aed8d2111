//! Local block-cycled storage.
//!
//! Space management by wholesale recycling: blobs live inside fixed-size
//! blocks ordered old → current → new, and a full ring releases its oldest
//! block wholesale instead of tracking per-blob free space. The only index
//! is the [`DigestLocationMap`], a bounded cuckoo-displaced table; an entry
//! that falls out of it makes its blob unreachable, which *is* the eviction
//! mechanism.
//!
//! # Architecture
//!
//! ```text
//! LocalBlobAccess
//!     |
//!     +-- DigestLocationMap (per instance for AC, single for CAS)
//!     |       key -> Location { block id, offset, size }
//!     |
//!     +-- BlockRing  [ old | old | current | current | new ]
//!             |                                        ^ writes
//!             +-- BlockPool (memory, or a partitioned file / block device)
//! ```
//!
//! Reads from old blocks migrate their blob into a new block before the
//! rotation releases it; blobs nobody reads ride their block out of the
//! ring and disappear.

mod block_pool;
mod block_ring;
mod digest_location_map;
mod local_blob_access;

pub use block_pool::BlockPool;
pub use block_pool::DataBlock;
pub use block_pool::FileBlockPool;
pub use block_pool::MemoryBlockPool;
pub use block_ring::RingClass;
pub use digest_location_map::DigestLocationMap;
pub use local_blob_access::LocalBlobAccess;
pub use local_blob_access::LocalBlobAccessConfig;

/// Where a blob lives inside the block ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// The block holding the blob.
    pub block_id: u64,
    /// Byte offset of the blob inside the block.
    pub offset_bytes: u64,
    /// Length of the blob.
    pub size_bytes: i64,
}

impl Location {
    /// Ring order: blocks are released oldest-first, and within a block
    /// earlier offsets were written earlier.
    pub fn is_older_than(&self, other: &Location) -> bool {
        (self.block_id, self.offset_bytes) < (other.block_id, other.offset_bytes)
    }
}
