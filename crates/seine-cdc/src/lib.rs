//! Content-defined chunking.
//!
//! Splits byte streams into variable-size chunks at positions determined by
//! the content itself, so an insertion or edit only perturbs boundaries near
//! the change and the rest of the stream chunks identically. Boundaries are
//! found with a gear rolling hash: a per-byte lookup table feeds a shifting
//! 64-bit register, and a cut is declared whenever the register masked by the
//! target-size mask is zero.
//!
//! [`Chunker`] is the streaming entry point. It accepts input in arbitrary
//! slices and emits the same chunks regardless of how the stream is split
//! across `feed` calls.

mod chunker;
mod error;
mod gear;

pub use chunker::{Chunk, Chunker, HASH_WINDOW_SIZE};
pub use error::CdcError;
pub use gear::{gear_table, next_match, GearTable, GEAR_TABLE};
