//! Upload orchestrator tying the pipeline together.
//!
//! The [`Uploader`] drives files through chunking, hashing, dedup
//! resolution, and xorb assembly, finishing each batch with a shard
//! upload. Transports implement the [`CasClient`] trait; the in-memory
//! [`MemoryCasClient`] serves tests and local runs.

pub mod client;
pub mod error;
mod session;
pub mod uploader;

pub use client::{CasClient, MemoryCasClient};
pub use error::{ClientError, EngineError};
pub use uploader::{UploadSource, Uploader};

#[cfg(test)]
mod tests;
