//! Error types for xorb and shard operations.

/// Errors that can occur while assembling xorbs or reading/writing shards.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    /// A chunk is too large to frame (stored and raw lengths are u24).
    #[error("chunk of {0} bytes exceeds the frame length limit")]
    ChunkTooLarge(usize),

    /// A single chunk exceeds the xorb size or chunk-count caps.
    #[error("chunk of {0} bytes cannot fit in an empty xorb")]
    ChunkExceedsXorbCaps(usize),

    /// A shard rep referenced a local xorb index that was never sealed.
    #[error("shard references unknown local xorb index {0}")]
    UnknownXorbIndex(u32),

    /// The shard buffer is malformed or truncated.
    #[error("invalid shard: {0}")]
    InvalidShard(String),

    /// Shard has an unsupported format version.
    #[error("unsupported shard version {found}, this client supports version {supported}")]
    UnsupportedVersion {
        /// Version found in the shard header.
        found: u64,
        /// Version this client supports.
        supported: u64,
    },
}
