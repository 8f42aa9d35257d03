//! Session-local chunk dedup cache.
//!
//! Maps chunk hashes to where the chunk already lives: a xorb sealed in
//! this session, or a remote xorb learned from a dedup-query shard. Chunks
//! found here are referenced instead of re-uploaded.

use std::collections::HashMap;

use seine_types::ChunkHash;
use tracing::debug;

use crate::shard::{ShardData, XorbRef};

/// Where a known chunk lives and how big it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub xorb: XorbRef,
    /// Index of the chunk within its xorb.
    pub chunk_index: u32,
    /// Unframed chunk length in bytes.
    pub length: u32,
}

/// Chunk hash to location map for one upload session.
#[derive(Debug, Default)]
pub struct ChunkCache {
    entries: HashMap<ChunkHash, ChunkLocation>,
}

impl ChunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, hash: &ChunkHash) -> Option<ChunkLocation> {
        self.entries.get(hash).copied()
    }

    /// Record a chunk location. First sighting wins so stable references
    /// are never repointed mid-session.
    pub fn insert(&mut self, hash: ChunkHash, location: ChunkLocation) {
        self.entries.entry(hash).or_insert(location);
    }

    /// Register every chunk listed by a dedup-query shard as remotely
    /// available. Returns the number of newly learned chunks.
    pub fn register_shard(&mut self, shard: &ShardData) -> usize {
        let before = self.entries.len();
        for xorb in &shard.xorbs {
            for (index, chunk) in xorb.chunks.iter().enumerate() {
                self.insert(
                    chunk.hash,
                    ChunkLocation {
                        xorb: XorbRef::Remote(xorb.hash),
                        chunk_index: index as u32,
                        length: chunk.length,
                    },
                );
            }
        }
        let learned = self.entries.len() - before;
        debug!(learned, total = self.entries.len(), "registered shard in chunk cache");
        learned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ParsedXorbInfo;
    use crate::xorb::XorbChunkInfo;
    use seine_types::XorbHash;

    fn location(index: u32) -> ChunkLocation {
        ChunkLocation {
            xorb: XorbRef::Local(0),
            chunk_index: index,
            length: 100,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = ChunkCache::new();
        let hash = ChunkHash::from_data(b"chunk");
        assert!(cache.get(&hash).is_none());

        cache.insert(hash, location(3));
        assert_eq!(cache.get(&hash), Some(location(3)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_first_sighting_wins() {
        let mut cache = ChunkCache::new();
        let hash = ChunkHash::from_data(b"chunk");
        cache.insert(hash, location(1));
        cache.insert(hash, location(2));
        assert_eq!(cache.get(&hash), Some(location(1)));
    }

    #[test]
    fn test_register_shard_learns_remote_chunks() {
        let xorb_hash = XorbHash::from([5u8; 32]);
        let shard = ShardData {
            files: vec![],
            xorbs: vec![ParsedXorbInfo {
                hash: xorb_hash,
                packed_len: 116,
                unpacked_len: 100,
                chunks: vec![
                    XorbChunkInfo {
                        hash: ChunkHash::from_data(b"a"),
                        length: 60,
                        offset: 0,
                    },
                    XorbChunkInfo {
                        hash: ChunkHash::from_data(b"b"),
                        length: 40,
                        offset: 60,
                    },
                ],
            }],
        };

        let mut cache = ChunkCache::new();
        assert_eq!(cache.register_shard(&shard), 2);

        let loc = cache.get(&ChunkHash::from_data(b"b")).unwrap();
        assert_eq!(loc.xorb, XorbRef::Remote(xorb_hash));
        assert_eq!(loc.chunk_index, 1);
        assert_eq!(loc.length, 40);

        // Re-registering the same shard learns nothing new.
        assert_eq!(cache.register_shard(&shard), 0);
    }

    #[test]
    fn test_register_shard_does_not_clobber_local_entries() {
        let hash = ChunkHash::from_data(b"a");
        let mut cache = ChunkCache::new();
        cache.insert(hash, location(0));

        let shard = ShardData {
            files: vec![],
            xorbs: vec![ParsedXorbInfo {
                hash: XorbHash::from([5u8; 32]),
                packed_len: 68,
                unpacked_len: 60,
                chunks: vec![XorbChunkInfo {
                    hash,
                    length: 60,
                    offset: 0,
                }],
            }],
        };
        cache.register_shard(&shard);
        assert_eq!(cache.get(&hash), Some(location(0)));
    }
}
