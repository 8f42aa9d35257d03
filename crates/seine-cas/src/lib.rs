//! Content-addressed storage primitives for the upload pipeline.
//!
//! Three concerns live here:
//!
//! - **Xorb assembly** ([`XorbAssembler`]): framing chunks and aggregating
//!   them into bounded upload units identified by a tree hash over their
//!   chunk list.
//! - **Shard index** ([`ShardBuilder`], [`parse_shard`]): the binary format
//!   mapping files onto chunk ranges and chunks onto xorbs.
//! - **Chunk cache** ([`ChunkCache`]): the session-local map from chunk
//!   hash to known location, driving deduplication.

mod cache;
mod error;
mod node_hash;
mod shard;
mod xorb;

pub use cache::{ChunkCache, ChunkLocation};
pub use error::CasError;
pub use node_hash::{range_hash, tree_hash, BLAKE3_NODE_KEY};
pub use shard::{
    parse_shard, FileRep, ParsedFileInfo, ParsedFileRep, ParsedXorbInfo, ShardBuilder, ShardData,
    ShardFileInfo, XorbRef, FILE_FLAG_WITH_METADATA_EXT, FILE_FLAG_WITH_VERIFICATION,
    SHARD_FOOTER_SIZE, SHARD_HEADER_SIZE, SHARD_MAGIC_TAG,
};
pub use xorb::{
    write_chunk_frame, SealedXorb, XorbAssembler, XorbChunkInfo, CHUNK_FRAME_HEADER_SIZE,
};
