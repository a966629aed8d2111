//! Leaf backends: the storage trees' terminals.

mod circular;
mod cloud;
mod error;
mod memory;
mod redis;
mod remote;

pub use circular::CircularBlobAccess;
pub use circular::CircularConfig;
pub use cloud::Bucket;
pub use cloud::BucketObject;
pub use cloud::BucketWriter;
pub use cloud::CloudBlobAccess;
pub use error::ErrorBlobAccess;
pub use memory::MemoryBlobAccess;
pub use redis::RedisBlobAccess;
pub use redis::RedisClient;
pub use redis::ReplicationRequirement;
pub use remote::BlobServiceClient;
pub use remote::RemoteBlobAccess;
