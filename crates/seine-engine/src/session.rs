//! Upload session state.
//!
//! [`SessionState`] is the batch-wide mutable core shared by all file
//! workers: the chunk dedup cache, the open xorb, the sealed-xorb hash
//! list, and the shard under construction. It lives behind one mutex;
//! workers hold it only for cache lookups and chunk placement, never
//! across network calls.
//!
//! [`FileSession`] is the per-file accumulator: running sha256, byte
//! counters, and the representation ranges the file draws from xorbs.

use bytes::Bytes;
use seine_cas::{
    range_hash, tree_hash, CasError, ChunkCache, ChunkLocation, SealedXorb, ShardBuilder,
    ShardData, ShardFileInfo, XorbAssembler, XorbRef,
};
use seine_types::{ChunkHash, FileUploadResult, Sha256Hash, UploadConfig};
use sha2::{Digest, Sha256};

use crate::error::EngineError;

pub(crate) struct SessionState {
    pub cache: ChunkCache,
    assembler: XorbAssembler,
    /// Hashes of sealed xorbs in seal order; [`XorbRef::Local`] indices
    /// point into this list, with the open xorb at `len()`.
    sealed_hashes: Vec<seine_types::XorbHash>,
    shard: ShardBuilder,
}

impl SessionState {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            cache: ChunkCache::new(),
            assembler: XorbAssembler::new(config.max_xorb_size, config.max_xorb_chunks),
            sealed_hashes: Vec::new(),
            shard: ShardBuilder::new(),
        }
    }

    /// Register a dedup-query shard's chunk listing into the cache.
    pub fn register_dedup_shard(&mut self, shard: &ShardData) -> usize {
        self.cache.register_shard(shard)
    }

    /// Place a chunk that is new to both the session and the remote CAS.
    ///
    /// Appends to the open xorb, sealing it first when full. Returns the
    /// chunk's location and the sealed xorb to upload, if one was produced.
    pub fn place_new(
        &mut self,
        hash: ChunkHash,
        data: &[u8],
    ) -> Result<(ChunkLocation, Option<SealedXorb>), EngineError> {
        let mut sealed_out = None;

        let chunk_index = match self.assembler.try_append(hash, data)? {
            Some(index) => index,
            None => {
                // Refusal implies the open xorb is non-empty.
                let Some(sealed) = self.assembler.seal() else {
                    return Err(CasError::ChunkExceedsXorbCaps(data.len()).into());
                };
                self.shard.add_xorb(&sealed);
                self.sealed_hashes.push(sealed.hash);
                sealed_out = Some(sealed);

                match self.assembler.try_append(hash, data)? {
                    Some(index) => index,
                    None => return Err(CasError::ChunkExceedsXorbCaps(data.len()).into()),
                }
            }
        };

        let location = ChunkLocation {
            xorb: XorbRef::Local(self.sealed_hashes.len() as u32),
            chunk_index,
            length: data.len() as u32,
        };
        self.cache.insert(hash, location);
        Ok((location, sealed_out))
    }

    /// Seal the open xorb at end of batch. Returns it for upload.
    pub fn seal_final(&mut self) -> Option<SealedXorb> {
        let sealed = self.assembler.seal()?;
        self.shard.add_xorb(&sealed);
        self.sealed_hashes.push(sealed.hash);
        Some(sealed)
    }

    pub fn add_file(&mut self, info: ShardFileInfo) {
        self.shard.add_file(info);
    }

    /// Serialize the session's shard. `None` when nothing was recorded.
    pub fn build_shard(&self, created_at: Option<u64>) -> Result<Option<Bytes>, EngineError> {
        if self.shard.is_empty() {
            return Ok(None);
        }
        let bytes = match created_at {
            Some(stamp) => self
                .shard
                .serialize_with_timestamp(&self.sealed_hashes, stamp)?,
            None => self.shard.serialize(&self.sealed_hashes)?,
        };
        Ok(Some(bytes))
    }
}

struct RepRange {
    xorb: XorbRef,
    chunk_index_start: u32,
    chunk_index_end: u32,
    unpacked_len: u32,
    chunk_hashes: Vec<ChunkHash>,
}

/// Per-file accumulator, owned by a single file worker.
pub(crate) struct FileSession {
    path: String,
    sha256: Sha256,
    total_bytes: u64,
    dedup_bytes: u64,
    chunks: Vec<(ChunkHash, u64)>,
    ranges: Vec<RepRange>,
}

impl FileSession {
    pub fn new(path: String) -> Self {
        Self {
            path,
            sha256: Sha256::new(),
            total_bytes: 0,
            dedup_bytes: 0,
            chunks: Vec::new(),
            ranges: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Feed a source block into the whole-file hash.
    pub fn update_sha256(&mut self, block: &[u8]) {
        self.sha256.update(block);
    }

    /// Record where one of the file's chunks lives.
    ///
    /// Consecutive chunks from the same xorb merge into one rep range.
    pub fn record_chunk(&mut self, hash: ChunkHash, location: ChunkLocation, deduped: bool) {
        let length = location.length;
        self.total_bytes += length as u64;
        if deduped {
            self.dedup_bytes += length as u64;
        }
        self.chunks.push((hash, length as u64));

        if let Some(last) = self.ranges.last_mut() {
            if last.xorb == location.xorb && last.chunk_index_end == location.chunk_index {
                last.chunk_index_end += 1;
                last.unpacked_len += length;
                last.chunk_hashes.push(hash);
                return;
            }
        }
        self.ranges.push(RepRange {
            xorb: location.xorb,
            chunk_index_start: location.chunk_index,
            chunk_index_end: location.chunk_index + 1,
            unpacked_len: length,
            chunk_hashes: vec![hash],
        });
    }

    /// Close out the file: its shard record and its caller-facing result.
    pub fn finish(self) -> (ShardFileInfo, FileUploadResult) {
        let sha256 = Sha256Hash::from(<[u8; 32]>::from(self.sha256.finalize()));
        let file_hash = tree_hash(&self.chunks);
        let dedup_ratio = if self.total_bytes == 0 {
            0.0
        } else {
            self.dedup_bytes as f64 / self.total_bytes as f64
        };

        let reps = self
            .ranges
            .into_iter()
            .map(|range| seine_cas::FileRep {
                xorb: range.xorb,
                unpacked_len: range.unpacked_len,
                chunk_index_start: range.chunk_index_start,
                chunk_index_end: range.chunk_index_end,
                range_hash: range_hash(&range.chunk_hashes),
            })
            .collect();

        let info = ShardFileInfo {
            file_hash,
            sha256,
            reps,
        };
        let result = FileUploadResult {
            path: self.path,
            sha256,
            dedup_ratio,
            total_bytes: self.total_bytes,
            dedup_bytes: self.dedup_bytes,
        };
        (info, result)
    }
}
