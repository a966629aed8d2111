//! Decorator backends: composition nodes of a storage tree.

mod existence_caching;
mod mirrored;
mod read_caching;
mod sharding;
mod size_distinguishing;

pub use existence_caching::ExistenceCachingBlobAccess;
pub use mirrored::MirroredBlobAccess;
pub use read_caching::ReadCachingBlobAccess;
pub use sharding::Shard;
pub use sharding::ShardingBlobAccess;
pub use size_distinguishing::SizeDistinguishingBlobAccess;
