//! Redis-backed storage.
//!
//! The concrete Redis connection is an external collaborator behind
//! [`RedisClient`]; this module owns the storage semantics: key formats,
//! TTLs and the write-acknowledgement policy that turns `WAIT n t` into a
//! durability requirement.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::Result;
use larch_buffer::StorageError;
use larch_digest::Digest;
use larch_digest::DigestSet;
use tracing::debug;

use crate::blob_access::BlobAccess;
use crate::storage_kind::StorageKind;

/// Minimal Redis command surface the backend consumes.
#[async_trait]
pub trait RedisClient: Send + Sync {
    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// `SET key value` with an optional expiry.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// `EXISTS key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// `DEL key`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// `WAIT replicas timeout`; returns how many replicas acknowledged.
    async fn wait(&self, replicas: u32, timeout: Duration) -> Result<u32>;
}

/// Durability requirement applied after every write.
#[derive(Debug, Clone, Copy)]
pub struct ReplicationRequirement {
    /// Number of replicas that must acknowledge a write.
    pub count: u32,
    /// How long to wait for the acknowledgements.
    pub timeout: Duration,
}

/// Stores blobs in Redis.
pub struct RedisBlobAccess {
    client: Arc<dyn RedisClient>,
    kind: StorageKind,
    key_ttl: Option<Duration>,
    replication: Option<ReplicationRequirement>,
}

impl RedisBlobAccess {
    pub fn new(
        client: Arc<dyn RedisClient>,
        kind: StorageKind,
        key_ttl: Option<Duration>,
        replication: Option<ReplicationRequirement>,
    ) -> Self {
        Self {
            client,
            kind,
            key_ttl,
            replication,
        }
    }
}

#[async_trait]
impl BlobAccess for RedisBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let key = self.kind.digest_key(digest);
        let data = match self.client.get(&key).await {
            Ok(Some(data)) => data,
            Ok(None) => return Buffer::from_error(StorageError::not_found(key)),
            Err(e) => return Buffer::from_error(e),
        };
        let client = Arc::clone(&self.client);
        let repair_key = key.clone();
        self.kind.new_buffer_from_bytes(
            digest,
            data,
            BufferSource::reparable(move || async move { client.delete(&repair_key).await }),
        )
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        let max_size = buffer.declared_size().unwrap_or(digest.size_bytes()).max(0) as usize;
        let data = buffer.into_bytes(max_size).await?;
        let key = self.kind.digest_key(digest);
        self.client.set(&key, data, self.key_ttl).await?;
        if let Some(replication) = self.replication {
            let acknowledged = self.client.wait(replication.count, replication.timeout).await?;
            if acknowledged < replication.count {
                return Err(StorageError::unavailable(format!(
                    "write of {digest} was acknowledged by {acknowledged} of {} replicas",
                    replication.count
                )));
            }
        }
        debug!(%digest, "blob stored in redis");
        Ok(())
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        if self.kind == StorageKind::Ac {
            return Err(StorageError::unimplemented(
                "action-cache backends do not support find_missing",
            ));
        }
        let mut missing = DigestSet::builder();
        for digest in digests.iter() {
            if !self.client.exists(&self.kind.digest_key(digest)).await? {
                missing.add(digest.clone());
            }
        }
        Ok(missing.build())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use larch_buffer::ErrorCode;
    use larch_testing::cas_blob;
    use larch_testing::cas_buffer;
    use parking_lot::Mutex;

    use super::*;

    /// In-process stand-in for a Redis connection.
    struct FakeRedis {
        entries: Mutex<HashMap<String, Bytes>>,
        acknowledging_replicas: u32,
    }

    impl FakeRedis {
        fn new(acknowledging_replicas: u32) -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(HashMap::new()),
                acknowledging_replicas,
            })
        }
    }

    #[async_trait]
    impl RedisClient for FakeRedis {
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            Ok(self.entries.lock().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Bytes, _ttl: Option<Duration>) -> Result<()> {
            self.entries.lock().insert(key.to_string(), value);
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.entries.lock().contains_key(key))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.entries.lock().remove(key);
            Ok(())
        }

        async fn wait(&self, _replicas: u32, _timeout: Duration) -> Result<u32> {
            Ok(self.acknowledging_replicas)
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let storage = RedisBlobAccess::new(FakeRedis::new(0), StorageKind::Cas, None, None);
        let (digest, data) = cas_blob(b"hello");

        storage.put(&digest, cas_buffer(b"hello")).await.unwrap();
        assert_eq!(storage.get(&digest).await.into_bytes(1024).await.unwrap(), data);
    }

    #[tokio::test]
    async fn unacknowledged_write_is_unavailable() {
        let storage = RedisBlobAccess::new(
            FakeRedis::new(1),
            StorageKind::Cas,
            None,
            Some(ReplicationRequirement {
                count: 2,
                timeout: Duration::from_secs(1),
            }),
        );
        let (digest, _) = cas_blob(b"hello");
        let err = storage.put(&digest, cas_buffer(b"hello")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn acknowledged_write_succeeds() {
        let storage = RedisBlobAccess::new(
            FakeRedis::new(2),
            StorageKind::Cas,
            Some(Duration::from_secs(3600)),
            Some(ReplicationRequirement {
                count: 2,
                timeout: Duration::from_secs(1),
            }),
        );
        let (digest, _) = cas_blob(b"hello");
        storage.put(&digest, cas_buffer(b"hello")).await.unwrap();
    }

    /// A connection whose writes hang forever.
    struct HangingRedis {
        inner: Arc<FakeRedis>,
    }

    #[async_trait]
    impl RedisClient for HangingRedis {
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.inner.get(key).await
        }

        async fn set(&self, _key: &str, _value: Bytes, _ttl: Option<Duration>) -> Result<()> {
            std::future::pending().await
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn wait(&self, _replicas: u32, _timeout: Duration) -> Result<u32> {
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_put_leaves_nothing_visible() {
        let inner = FakeRedis::new(0);
        let storage = RedisBlobAccess::new(
            Arc::new(HangingRedis {
                inner: Arc::clone(&inner),
            }),
            StorageKind::Cas,
            None,
            None,
        );
        let (digest, _) = cas_blob(b"hello");

        // The caller gives up; dropping the future aborts the write.
        let put = storage.put(&digest, cas_buffer(b"hello"));
        assert!(tokio::time::timeout(Duration::from_millis(50), put).await.is_err());

        assert!(!inner.entries.lock().contains_key(&StorageKind::Cas.digest_key(&digest)));
        let missing = storage.find_missing([digest.clone()].into_iter().collect()).await.unwrap();
        assert!(missing.contains(&digest));
    }

    #[tokio::test]
    async fn find_missing_uses_exists() {
        let storage = RedisBlobAccess::new(FakeRedis::new(0), StorageKind::Cas, None, None);
        let (present, _) = cas_blob(b"present");
        let (absent, _) = cas_blob(b"absent");
        storage.put(&present, cas_buffer(b"present")).await.unwrap();

        let missing = storage
            .find_missing([present, absent.clone()].into_iter().collect())
            .await
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert!(missing.contains(&absent));
    }
}
