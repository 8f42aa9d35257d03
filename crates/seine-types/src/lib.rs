//! Shared types and identifiers for Seine.
//!
//! This crate defines the core types used across the Seine workspace:
//! content-addressed identifiers ([`ChunkHash`], [`XorbHash`],
//! [`Sha256Hash`]), upload pipeline events ([`UploadEvent`],
//! [`FileUploadResult`]), and configuration ([`ChunkerConfig`],
//! [`UploadConfig`]).

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Hash types
// ---------------------------------------------------------------------------

macro_rules! define_hash {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// The all-zero hash, used as a placeholder/sentinel.
            pub const ZERO: Self = Self([0u8; 32]);

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Parse a 64-character lowercase hex string.
            pub fn from_hex(hex: &str) -> Option<Self> {
                if hex.len() != 64 {
                    return None;
                }
                let mut bytes = [0u8; 32];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = u8::from_str_radix(hex.get(2 * i..2 * i + 2)?, 16).ok()?;
                }
                Some(Self(bytes))
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_hash!(
    /// Content-addressed identifier for a chunk: the tree hash of its bytes.
    ChunkHash
);

define_hash!(
    /// Identity of a sealed xorb: the keyed node-tree hash over its ordered
    /// chunk `(hash, length)` pairs.
    XorbHash
);

define_hash!(
    /// Whole-file SHA-256 digest, computed alongside chunking and used for
    /// post-upload verification.
    Sha256Hash
);

impl ChunkHash {
    /// Hash arbitrary data with the Seine tree hash.
    pub fn from_data(data: &[u8]) -> Self {
        Self(seine_hash::hash(data))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default target (average) chunk size: 64 KiB. Must be a power of two.
pub const DEFAULT_TARGET_CHUNK_SIZE: usize = 64 * 1024;

/// Divisor deriving the minimum chunk size from the target.
pub const MINIMUM_CHUNK_DIVISOR: usize = 8;

/// Multiplier deriving the maximum chunk size from the target.
pub const MAXIMUM_CHUNK_MULTIPLIER: usize = 2;

/// Default maximum xorb payload size: 64 MiB.
pub const DEFAULT_MAX_XORB_SIZE: usize = 64 * 1024 * 1024;

/// Default maximum number of chunks per xorb.
pub const DEFAULT_MAX_XORB_CHUNKS: usize = 8 * 1024;

/// Chunk boundary parameters.
///
/// **These must never change between sessions that are expected to
/// deduplicate against each other** — the same data would otherwise produce
/// different chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target (expected average) chunk size in bytes. Power of two.
    pub target_chunk_size: usize,
    /// Hard lower clamp on chunk length.
    pub min_chunk_size: usize,
    /// Hard upper clamp on chunk length; a cut is forced here.
    pub max_chunk_size: usize,
}

impl ChunkerConfig {
    /// Derive min/max clamps from a power-of-two target size.
    pub fn from_target(target_chunk_size: usize) -> Self {
        Self {
            target_chunk_size,
            min_chunk_size: target_chunk_size / MINIMUM_CHUNK_DIVISOR,
            max_chunk_size: target_chunk_size * MAXIMUM_CHUNK_MULTIPLIER,
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::from_target(DEFAULT_TARGET_CHUNK_SIZE)
    }
}

/// Upload orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunk boundary parameters.
    pub chunker: ChunkerConfig,
    /// Maximum xorb payload size in bytes before sealing.
    pub max_xorb_size: usize,
    /// Maximum number of chunks per xorb before sealing.
    pub max_xorb_chunks: usize,
    /// Read block size for streaming sources.
    pub read_block_size: usize,
    /// Files chunked/hashed concurrently.
    pub file_workers: usize,
    /// Xorb/shard network uploads in flight concurrently.
    pub upload_workers: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            max_xorb_size: DEFAULT_MAX_XORB_SIZE,
            max_xorb_chunks: DEFAULT_MAX_XORB_CHUNKS,
            read_block_size: 1024 * 1024, // 1 MiB
            file_workers: 4,
            upload_workers: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Upload events and results
// ---------------------------------------------------------------------------

/// Progress events emitted by the upload orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UploadEvent {
    /// A block of a file was processed.
    FileProgress {
        /// Repository-relative path of the file.
        path: String,
        /// Fraction complete in `0.0..=1.0`.
        progress: f64,
    },
    /// A file finished chunking and classification.
    FileDone {
        /// Repository-relative path of the file.
        path: String,
        /// Whole-file SHA-256.
        sha256: Sha256Hash,
        /// `dedup_bytes / total_bytes`; 0.0 for an empty file.
        dedup_ratio: f64,
    },
    /// A file's source failed; sibling files continue.
    FileFailed {
        /// Repository-relative path of the file.
        path: String,
        /// Rendered error message.
        error: String,
    },
    /// A sealed xorb was uploaded.
    XorbUploaded {
        /// Identity hash of the xorb.
        hash: XorbHash,
        /// Serialized (framed) size in bytes.
        size: u64,
    },
}

/// Final per-file outcome of an upload batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUploadResult {
    /// Repository-relative path of the file.
    pub path: String,
    /// Whole-file SHA-256.
    pub sha256: Sha256Hash,
    /// `dedup_bytes / total_bytes`; 0.0 for an empty file.
    pub dedup_ratio: f64,
    /// Total bytes read from the source.
    pub total_bytes: u64,
    /// Bytes satisfied by deduplication instead of upload.
    pub dedup_bytes: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
