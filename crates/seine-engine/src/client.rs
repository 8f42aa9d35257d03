//! The client trait the engine uploads through, plus an in-memory
//! implementation for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use seine_cas::parse_shard;
use seine_types::{ChunkHash, XorbHash};
use tracing::debug;

use crate::error::ClientError;

/// Transport to the CAS tier.
///
/// All implementations must be `Send + Sync` for use across worker tasks.
/// Payloads are [`Bytes`] so sealed artifacts move without copying.
#[async_trait::async_trait]
pub trait CasClient: Send + Sync {
    /// Ask whether a chunk is already present remotely.
    ///
    /// Returns the serialized shard listing the xorbs that contain it, or
    /// `None` when the chunk is unknown.
    async fn query_dedup(&self, hash: ChunkHash) -> Result<Option<Bytes>, ClientError>;

    /// Upload a sealed xorb under its identity hash.
    async fn put_xorb(&self, hash: XorbHash, data: Bytes) -> Result<(), ClientError>;

    /// Upload a serialized shard.
    async fn put_shard(&self, data: Bytes) -> Result<(), ClientError>;
}

/// In-memory CAS backed by `RwLock<HashMap>`.
///
/// Behaves like the real service for dedup purposes: every uploaded shard's
/// chunk listing becomes queryable, so a second upload of the same content
/// dedups against the first.
#[derive(Default)]
pub struct MemoryCasClient {
    xorbs: RwLock<HashMap<XorbHash, Bytes>>,
    shards: RwLock<Vec<Bytes>>,
    /// Chunk hash to the shard that lists it.
    dedup_index: RwLock<HashMap<ChunkHash, Bytes>>,
    dedup_queries: AtomicU64,
    fail_uploads: AtomicBool,
}

impl MemoryCasClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put_xorb`/`put_shard` fail (for tests).
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::Relaxed);
    }

    pub fn xorb_count(&self) -> usize {
        self.xorbs.read().expect("lock poisoned").len()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.read().expect("lock poisoned").len()
    }

    pub fn has_xorb(&self, hash: XorbHash) -> bool {
        self.xorbs.read().expect("lock poisoned").contains_key(&hash)
    }

    pub fn xorb_bytes(&self, hash: XorbHash) -> Option<Bytes> {
        self.xorbs.read().expect("lock poisoned").get(&hash).cloned()
    }

    pub fn shards(&self) -> Vec<Bytes> {
        self.shards.read().expect("lock poisoned").clone()
    }

    /// How many dedup lookups reached this client.
    pub fn dedup_queries(&self) -> u64 {
        self.dedup_queries.load(Ordering::Relaxed)
    }

    fn check_failure(&self) -> Result<(), ClientError> {
        if self.fail_uploads.load(Ordering::Relaxed) {
            return Err(ClientError::new("injected upload failure"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CasClient for MemoryCasClient {
    async fn query_dedup(&self, hash: ChunkHash) -> Result<Option<Bytes>, ClientError> {
        self.dedup_queries.fetch_add(1, Ordering::Relaxed);
        let index = self.dedup_index.read().expect("lock poisoned");
        Ok(index.get(&hash).cloned())
    }

    async fn put_xorb(&self, hash: XorbHash, data: Bytes) -> Result<(), ClientError> {
        self.check_failure()?;
        debug!(%hash, size = data.len(), "storing xorb in memory");
        self.xorbs.write().expect("lock poisoned").insert(hash, data);
        Ok(())
    }

    async fn put_shard(&self, data: Bytes) -> Result<(), ClientError> {
        self.check_failure()?;
        let parsed = parse_shard(&data).map_err(ClientError::new)?;

        let mut index = self.dedup_index.write().expect("lock poisoned");
        for xorb in &parsed.xorbs {
            for chunk in &xorb.chunks {
                index.entry(chunk.hash).or_insert_with(|| data.clone());
            }
        }
        drop(index);

        debug!(
            size = data.len(),
            files = parsed.files.len(),
            xorbs = parsed.xorbs.len(),
            "storing shard in memory"
        );
        self.shards.write().expect("lock poisoned").push(data);
        Ok(())
    }
}
