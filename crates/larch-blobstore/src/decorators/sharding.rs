//! Weighted deterministic sharding.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use larch_buffer::Buffer;
use larch_buffer::Result;
use larch_buffer::StorageError;
use larch_digest::Digest;
use larch_digest::DigestSet;

use crate::blob_access::BlobAccess;
use crate::hashing::fnv1a64;
use crate::hashing::splitmix64;

/// One shard of a sharded store.
#[derive(Debug)]
pub struct Shard {
    /// The shard's backend, or `None` when the shard is drained.
    pub backend: Option<Arc<dyn BlobAccess>>,
    /// Relative share of traffic this shard receives.
    pub weight: u32,
}

/// Spreads blobs over shards by digest, proportionally to shard weights.
///
/// Selection draws candidates from a deterministic sequence seeded by the
/// configured initialization value and the digest hash, retrying until an
/// undrained shard comes up. Draining a shard therefore spills exactly its
/// own traffic onto the remaining shards: a digest whose first draw already
/// lands on an undrained shard keeps its assignment, which is what makes
/// incremental drains cheap. Weights, not a modulo over live shards, are
/// what keeps this stable.
#[derive(Debug)]
pub struct ShardingBlobAccess {
    shards: Vec<Shard>,
    // Cumulative weight boundaries; cumulative_weights[i] is the first draw
    // value mapping past shard i.
    cumulative_weights: Vec<u64>,
    total_weight: u64,
    hash_initialization: u64,
}

impl ShardingBlobAccess {
    pub fn new(shards: Vec<Shard>, hash_initialization: u64) -> Result<Self> {
        let total_weight: u64 = shards.iter().map(|s| u64::from(s.weight)).sum();
        if total_weight == 0 {
            return Err(StorageError::invalid_argument("shard weights sum to zero"));
        }
        if !shards.iter().any(|s| s.backend.is_some() && s.weight > 0) {
            return Err(StorageError::invalid_argument("every weighted shard is drained"));
        }
        let mut cumulative_weights = Vec::with_capacity(shards.len());
        let mut running = 0u64;
        for shard in &shards {
            running += u64::from(shard.weight);
            cumulative_weights.push(running);
        }
        Ok(Self {
            shards,
            cumulative_weights,
            total_weight,
            hash_initialization,
        })
    }

    /// The shard index serving `digest`.
    pub fn shard_for(&self, digest: &Digest) -> usize {
        let mut state = fnv1a64(self.hash_initialization, digest.hash());
        loop {
            let draw = state % self.total_weight;
            let index = self.cumulative_weights.partition_point(|boundary| *boundary <= draw);
            if self.shards[index].backend.is_some() {
                return index;
            }
            state = splitmix64(state);
        }
    }

    fn backend_for(&self, digest: &Digest) -> &Arc<dyn BlobAccess> {
        let index = self.shard_for(digest);
        match &self.shards[index].backend {
            Some(backend) => backend,
            // shard_for only returns undrained shards.
            None => unreachable!("selected a drained shard"),
        }
    }
}

#[async_trait]
impl BlobAccess for ShardingBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        self.backend_for(digest).get(digest).await
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<()> {
        let index = self.shard_for(digest);
        match &self.shards[index].backend {
            Some(backend) => backend
                .put(digest, buffer)
                .await
                .map_err(|e| e.with_context(&format!("shard {index}"))),
            None => unreachable!("selected a drained shard"),
        }
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet> {
        // Partition the query per shard, ask all shards concurrently, union
        // the answers. Shards are not cancelled when a sibling fails; their
        // partial answers are simply discarded with the first error.
        let mut per_shard: Vec<larch_digest::DigestSetBuilder> =
            (0..self.shards.len()).map(|_| DigestSet::builder()).collect();
        for digest in digests {
            let index = self.shard_for(&digest);
            per_shard[index].add(digest);
        }

        let queries = per_shard.into_iter().enumerate().filter_map(|(index, builder)| {
            let subset = builder.build();
            if subset.is_empty() {
                return None;
            }
            let backend = self.shards[index].backend.as_ref()?;
            Some(async move {
                backend
                    .find_missing(subset)
                    .await
                    .map_err(|e| e.with_context(&format!("shard {index}")))
            })
        });

        let mut missing = DigestSet::empty();
        for result in join_all(queries).await {
            missing = missing.union(&result?);
        }
        Ok(missing)
    }
}
