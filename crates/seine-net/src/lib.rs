//! HTTP transport to the hub and CAS services.
//!
//! [`HttpCasClient`] implements the engine's [`seine_engine::CasClient`]
//! trait: dedup lookups, xorb uploads, and shard uploads, each
//! authenticated with a cached hub write token.

mod client;
mod error;
mod token;

pub use client::HttpCasClient;
pub use error::NetError;
pub use token::{TokenConfig, WriteToken, WriteTokenProvider, JWT_SAFETY_PERIOD};
