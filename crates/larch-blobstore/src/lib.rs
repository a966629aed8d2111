//! Blob storage for the Larch remote-build storage plane.
//!
//! Everything here implements or composes one contract, [`BlobAccess`]:
//! `get` / `put` / `find_missing` over digest-addressed blobs. A deployment
//! assembles a tree of these (leaf backends at the bottom, decorators
//! above) and serves both object families (content-addressed blobs and
//! action-cache entries) through the same interface.
//!
//! # Architecture
//!
//! ```text
//! front-ends (FindMissingBlobs / BatchUpdateBlobs / Read / Write)
//!        |
//!        v
//! decorators: sharding, mirrored, size_distinguishing,
//!             read_caching, existence_caching
//!        |
//!        v
//! leaves: memory, redis, cloud bucket, remote node,
//!         circular file, local block engine, fixed error
//! ```
//!
//! Blob contents travel as [`larch_buffer::Buffer`] streams, which carry
//! the integrity machinery; backends here only decide where bytes live.
//!
//! # Fixed limits
//!
//! Every unbounded-looking structure has a configured bound: the
//! digest-location map's probe counts, the existence cache's capacity and
//! TTL, the clone-stream window, the circular store's file sizes. The
//! bounds are the deployment's knobs, not incidental constants.

pub mod backends;
mod blob_access;
pub mod config;
pub mod decorators;
mod existence_cache;
mod hashing;
pub mod local;
pub mod replication;
mod storage_kind;

pub use blob_access::BlobAccess;
pub use existence_cache::ExistenceCache;
pub use storage_kind::StorageKind;
