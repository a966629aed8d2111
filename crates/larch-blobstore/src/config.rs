//! Declarative composition of storage trees.
//!
//! A deployment describes its storage plane as a tree of
//! [`BlobAccessConfig`] nodes, leaves at the bottom and decorators above,
//! and [`new_blob_access_from_config`] builds the matching [`BlobAccess`]
//! tree. Backends that need an external connection (Redis, cloud buckets,
//! remote nodes) are resolved through a [`ClientResolver`] supplied by the
//! process bring-up, so this crate never touches provider SDKs or RPC
//! transports.
//!
//! # Example
//!
//! ```
//! use larch_blobstore::config::BlobAccessConfig;
//!
//! let config: BlobAccessConfig = serde_json::from_str(
//!     r#"{
//!         "read_caching": {
//!             "slow": { "sharding": {
//!                 "hash_initialization": 14695981039346656037,
//!                 "shards": [
//!                     { "weight": 1, "backend": { "memory": {} } },
//!                     { "weight": 1, "backend": null }
//!                 ]
//!             } },
//!             "fast": { "memory": {} }
//!         }
//!     }"#,
//! )
//! .unwrap();
//! # let _ = config;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use larch_buffer::Result;
use larch_buffer::StorageError;
use serde::Deserialize;

use crate::backends::Bucket;
use crate::backends::BlobServiceClient;
use crate::backends::CircularBlobAccess;
use crate::backends::CircularConfig;
use crate::backends::CloudBlobAccess;
use crate::backends::ErrorBlobAccess;
use crate::backends::MemoryBlobAccess;
use crate::backends::RedisBlobAccess;
use crate::backends::RedisClient;
use crate::backends::RemoteBlobAccess;
use crate::backends::ReplicationRequirement;
use crate::blob_access::BlobAccess;
use crate::decorators::ExistenceCachingBlobAccess;
use crate::decorators::MirroredBlobAccess;
use crate::decorators::ReadCachingBlobAccess;
use crate::decorators::Shard;
use crate::decorators::ShardingBlobAccess;
use crate::decorators::SizeDistinguishingBlobAccess;
use crate::local::FileBlockPool;
use crate::local::LocalBlobAccess;
use crate::local::LocalBlobAccessConfig;
use crate::local::MemoryBlockPool;
use crate::replication::BlobReplicator;
use crate::replication::LocalBlobReplicator;
use crate::replication::QueuedBlobReplicator;
use crate::replication::RemoteBlobReplicator;
use crate::replication::ReplicatorClient;
use crate::storage_kind::StorageKind;

/// Supplies the external clients a configuration may reference.
///
/// Process bring-up implements this against real SDKs; the default
/// [`NoClientResolver`] rejects every endpoint, which is correct for trees
/// composed purely of in-process backends.
#[async_trait]
pub trait ClientResolver: Send + Sync {
    async fn redis(&self, endpoint: &str) -> Result<Arc<dyn RedisClient>>;
    async fn bucket(&self, bucket_url: &str) -> Result<Arc<dyn Bucket>>;
    async fn grpc(&self, endpoint: &str) -> Result<Arc<dyn BlobServiceClient>>;
    async fn remote(&self, endpoint: &str) -> Result<Arc<dyn BlobServiceClient>>;
    async fn replicator_service(&self, endpoint: &str) -> Result<Arc<dyn ReplicatorClient>>;
}

/// Rejects every external endpoint.
pub struct NoClientResolver;

#[async_trait]
impl ClientResolver for NoClientResolver {
    async fn redis(&self, endpoint: &str) -> Result<Arc<dyn RedisClient>> {
        Err(StorageError::invalid_argument(format!("no redis client available for '{endpoint}'")))
    }

    async fn bucket(&self, bucket_url: &str) -> Result<Arc<dyn Bucket>> {
        Err(StorageError::invalid_argument(format!("no bucket client available for '{bucket_url}'")))
    }

    async fn grpc(&self, endpoint: &str) -> Result<Arc<dyn BlobServiceClient>> {
        Err(StorageError::invalid_argument(format!("no grpc client available for '{endpoint}'")))
    }

    async fn remote(&self, endpoint: &str) -> Result<Arc<dyn BlobServiceClient>> {
        Err(StorageError::invalid_argument(format!("no remote client available for '{endpoint}'")))
    }

    async fn replicator_service(&self, endpoint: &str) -> Result<Arc<dyn ReplicatorClient>> {
        Err(StorageError::invalid_argument(format!(
            "no replicator client available for '{endpoint}'"
        )))
    }
}

/// The error status a fixed-error backend reports.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatusConfig {
    NotFound,
    InvalidArgument,
    DeadlineExceeded,
    Cancelled,
    Unavailable,
    ResourceExhausted,
    Internal,
    Unimplemented,
}

impl ErrorStatusConfig {
    fn into_error(self, message: String) -> StorageError {
        match self {
            ErrorStatusConfig::NotFound => StorageError::NotFound { message },
            ErrorStatusConfig::InvalidArgument => StorageError::InvalidArgument { message },
            ErrorStatusConfig::DeadlineExceeded => StorageError::DeadlineExceeded { message },
            ErrorStatusConfig::Cancelled => StorageError::Cancelled { message },
            ErrorStatusConfig::Unavailable => StorageError::Unavailable { message },
            ErrorStatusConfig::ResourceExhausted => StorageError::ResourceExhausted { message },
            ErrorStatusConfig::Internal => StorageError::Internal { message },
            ErrorStatusConfig::Unimplemented => StorageError::Unimplemented { message },
        }
    }
}

/// One shard of a sharded tree; a `null` backend marks it drained.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardConfig {
    pub weight: u32,
    pub backend: Option<Box<BlobAccessConfig>>,
}

/// How a mirrored pair heals one-sided blobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicatorConfig {
    /// Copy inline in the calling process.
    Local,
    /// Delegate to an external replicator service.
    Remote { endpoint: String },
    /// Deduplicate and serialize requests in front of a base strategy.
    Queued {
        base: Box<ReplicatorConfig>,
        cache_ttl_seconds: u64,
        cache_capacity: usize,
    },
}

/// What backs a local engine's blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalBackingConfig {
    Memory,
    /// A preallocated file or raw block device, partitioned into blocks.
    /// `spare_blocks` are allocated beyond the ring widths so rotation can
    /// proceed while readers drain released blocks.
    File { path: PathBuf, spare_blocks: usize },
}

/// A storage tree: exactly one backend kind per node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobAccessConfig {
    Memory {},
    Error {
        status: ErrorStatusConfig,
        message: String,
    },
    Redis {
        endpoint: String,
        key_ttl_seconds: Option<u64>,
        replication_count: Option<u32>,
        replication_timeout_milliseconds: Option<u64>,
    },
    Cloud {
        bucket_url: String,
        #[serde(default)]
        key_prefix: String,
    },
    Grpc {
        endpoint: String,
    },
    Remote {
        endpoint: String,
    },
    Circular {
        directory: PathBuf,
        offset_slots: u64,
        data_size_bytes: u64,
        allocation_chunk_size_bytes: u64,
    },
    Local {
        backing: LocalBackingConfig,
        block_size_bytes: u64,
        old_blocks: usize,
        current_blocks: usize,
        new_blocks: usize,
        digest_location_map_size: usize,
        max_get_attempts: u32,
        max_put_attempts: u32,
        #[serde(default)]
        instances: Vec<String>,
    },
    Sharding {
        hash_initialization: u64,
        shards: Vec<ShardConfig>,
    },
    Mirrored {
        backend_a: Box<BlobAccessConfig>,
        backend_b: Box<BlobAccessConfig>,
        replicator_a_to_b: ReplicatorConfig,
        replicator_b_to_a: ReplicatorConfig,
    },
    SizeDistinguishing {
        small: Box<BlobAccessConfig>,
        large: Box<BlobAccessConfig>,
        cutoff_size_bytes: i64,
    },
    ReadCaching {
        slow: Box<BlobAccessConfig>,
        fast: Box<BlobAccessConfig>,
    },
    ExistenceCaching {
        backend: Box<BlobAccessConfig>,
        ttl_seconds: u64,
        capacity: usize,
    },
}

fn new_replicator_from_config<'a>(
    config: &'a ReplicatorConfig,
    source: Arc<dyn BlobAccess>,
    sink: Arc<dyn BlobAccess>,
    kind: StorageKind,
    resolver: &'a dyn ClientResolver,
) -> BoxFuture<'a, Result<Arc<dyn BlobReplicator>>> {
    Box::pin(async move {
        let replicator: Arc<dyn BlobReplicator> = match config {
            ReplicatorConfig::Local => Arc::new(LocalBlobReplicator::new(source, sink)),
            ReplicatorConfig::Remote { endpoint } => {
                let client = resolver.replicator_service(endpoint).await?;
                Arc::new(RemoteBlobReplicator::new(client, sink))
            }
            ReplicatorConfig::Queued {
                base,
                cache_ttl_seconds,
                cache_capacity,
            } => {
                let base = new_replicator_from_config(base, source, Arc::clone(&sink), kind, resolver).await?;
                Arc::new(QueuedBlobReplicator::new(
                    base,
                    sink,
                    kind,
                    Duration::from_secs(*cache_ttl_seconds),
                    *cache_capacity,
                ))
            }
        };
        Ok(replicator)
    })
}

/// Build the storage tree described by `config`.
pub fn new_blob_access_from_config<'a>(
    config: &'a BlobAccessConfig,
    kind: StorageKind,
    resolver: &'a dyn ClientResolver,
) -> BoxFuture<'a, Result<Arc<dyn BlobAccess>>> {
    Box::pin(async move {
        let backend: Arc<dyn BlobAccess> = match config {
            BlobAccessConfig::Memory {} => Arc::new(MemoryBlobAccess::new(kind)),
            BlobAccessConfig::Error { status, message } => {
                Arc::new(ErrorBlobAccess::new(status.into_error(message.clone())))
            }
            BlobAccessConfig::Redis {
                endpoint,
                key_ttl_seconds,
                replication_count,
                replication_timeout_milliseconds,
            } => {
                let client = resolver.redis(endpoint).await?;
                let replication = match (replication_count, replication_timeout_milliseconds) {
                    (Some(count), Some(timeout)) => Some(ReplicationRequirement {
                        count: *count,
                        timeout: Duration::from_millis(*timeout),
                    }),
                    (None, None) => None,
                    _ => {
                        return Err(StorageError::invalid_argument(
                            "replication_count and replication_timeout_milliseconds must be set together",
                        ))
                    }
                };
                Arc::new(RedisBlobAccess::new(
                    client,
                    kind,
                    key_ttl_seconds.map(Duration::from_secs),
                    replication,
                ))
            }
            BlobAccessConfig::Cloud { bucket_url, key_prefix } => {
                let bucket = resolver.bucket(bucket_url).await?;
                Arc::new(CloudBlobAccess::new(bucket, key_prefix.clone(), kind))
            }
            BlobAccessConfig::Grpc { endpoint } => Arc::new(RemoteBlobAccess::new(resolver.grpc(endpoint).await?, kind)),
            BlobAccessConfig::Remote { endpoint } => {
                Arc::new(RemoteBlobAccess::new(resolver.remote(endpoint).await?, kind))
            }
            BlobAccessConfig::Circular {
                directory,
                offset_slots,
                data_size_bytes,
                allocation_chunk_size_bytes,
            } => Arc::new(
                CircularBlobAccess::open(
                    directory,
                    kind,
                    CircularConfig {
                        offset_slots: *offset_slots,
                        data_size_bytes: *data_size_bytes,
                        allocation_chunk_size_bytes: *allocation_chunk_size_bytes,
                    },
                )
                .await?,
            ),
            BlobAccessConfig::Local {
                backing,
                block_size_bytes,
                old_blocks,
                current_blocks,
                new_blocks,
                digest_location_map_size,
                max_get_attempts,
                max_put_attempts,
                instances,
            } => {
                let pool: Arc<dyn crate::local::BlockPool> = match backing {
                    LocalBackingConfig::Memory => Arc::new(MemoryBlockPool::new(*block_size_bytes)),
                    LocalBackingConfig::File { path, spare_blocks } => {
                        let file = std::fs::OpenOptions::new()
                            .read(true)
                            .write(true)
                            .create(true)
                            .truncate(false)
                            .open(path)?;
                        let block_count = old_blocks + current_blocks + new_blocks + spare_blocks;
                        Arc::new(FileBlockPool::new(file, *block_size_bytes, block_count)?)
                    }
                };
                Arc::new(LocalBlobAccess::new(
                    kind,
                    &LocalBlobAccessConfig {
                        block_size_bytes: *block_size_bytes,
                        old_blocks: *old_blocks,
                        current_blocks: *current_blocks,
                        new_blocks: *new_blocks,
                        digest_location_map_size: *digest_location_map_size,
                        max_get_attempts: *max_get_attempts,
                        max_put_attempts: *max_put_attempts,
                        instances: instances.clone(),
                    },
                    pool,
                )?)
            }
            BlobAccessConfig::Sharding {
                hash_initialization,
                shards,
            } => {
                let mut built = Vec::with_capacity(shards.len());
                for shard in shards {
                    let backend = match &shard.backend {
                        Some(config) => Some(new_blob_access_from_config(config, kind, resolver).await?),
                        None => None,
                    };
                    built.push(Shard {
                        backend,
                        weight: shard.weight,
                    });
                }
                Arc::new(ShardingBlobAccess::new(built, *hash_initialization)?)
            }
            BlobAccessConfig::Mirrored {
                backend_a,
                backend_b,
                replicator_a_to_b,
                replicator_b_to_a,
            } => {
                let a = new_blob_access_from_config(backend_a, kind, resolver).await?;
                let b = new_blob_access_from_config(backend_b, kind, resolver).await?;
                let a_to_b =
                    new_replicator_from_config(replicator_a_to_b, Arc::clone(&a), Arc::clone(&b), kind, resolver)
                        .await?;
                let b_to_a =
                    new_replicator_from_config(replicator_b_to_a, Arc::clone(&b), Arc::clone(&a), kind, resolver)
                        .await?;
                Arc::new(MirroredBlobAccess::new(a, b, a_to_b, b_to_a))
            }
            BlobAccessConfig::SizeDistinguishing {
                small,
                large,
                cutoff_size_bytes,
            } => {
                let small = new_blob_access_from_config(small, kind, resolver).await?;
                let large = new_blob_access_from_config(large, kind, resolver).await?;
                Arc::new(SizeDistinguishingBlobAccess::new(small, large, *cutoff_size_bytes))
            }
            BlobAccessConfig::ReadCaching { slow, fast } => {
                let slow = new_blob_access_from_config(slow, kind, resolver).await?;
                let fast = new_blob_access_from_config(fast, kind, resolver).await?;
                Arc::new(ReadCachingBlobAccess::new(slow, fast))
            }
            BlobAccessConfig::ExistenceCaching {
                backend,
                ttl_seconds,
                capacity,
            } => {
                let backend = new_blob_access_from_config(backend, kind, resolver).await?;
                Arc::new(ExistenceCachingBlobAccess::new(
                    backend,
                    kind,
                    Duration::from_secs(*ttl_seconds),
                    *capacity,
                ))
            }
        };
        Ok(backend)
    })
}
