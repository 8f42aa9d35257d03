use thiserror::Error;

/// Errors from the chunking layer.
#[derive(Debug, Error)]
pub enum CdcError {
    /// The chunker was fed after `finish` was called.
    #[error("chunker already finished")]
    Finished,
}
