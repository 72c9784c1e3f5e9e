//! Crate-level error type.

use crate::api::ApiError;
use crate::transport::TransportError;

/// Errors surfaced by the messaging core.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// No live connection to the messaging server. The caller decides
    /// whether to retry or mark the affected message as failed.
    #[error("not connected to the messaging server")]
    NotConnected,

    /// A socket transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An error from the intercepted HTTP path.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// An outbound event failed to encode.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}
