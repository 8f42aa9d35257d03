//! Error types for the HTTP transport.

/// Errors from talking to the hub or the CAS service.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Transport-level failure (connect, TLS, timeout).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("api error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}
