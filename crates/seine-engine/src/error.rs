//! Error types for the upload engine.

/// Error surfaced by a [`crate::CasClient`] implementation.
///
/// Implementations live in other crates, so the engine carries their
/// failures opaquely.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ClientError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl ClientError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self(source.into())
    }
}

/// Errors that can occur during an upload batch.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Chunking error.
    #[error("chunking error: {0}")]
    Cdc(#[from] seine_cdc::CdcError),

    /// Xorb or shard error.
    #[error("cas error: {0}")]
    Cas(#[from] seine_cas::CasError),

    /// CAS client (network) error.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Failed to read from a byte source.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The batch was cancelled before finishing.
    #[error("upload cancelled")]
    Cancelled,

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// Every file in the batch failed.
    #[error("all {0} files failed to upload")]
    AllFilesFailed(usize),
}
