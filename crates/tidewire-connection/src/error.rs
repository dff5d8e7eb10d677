//! Error types for the connection layer.

use tidewire_encoding::EncodingError;
use tidewire_protocol::ErrorInfo;
use tidewire_transport::TransportError;

use crate::ConnectionState;

/// Errors that can occur during connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is in a state that doesn't allow this operation,
    /// e.g. sending while Suspended or Closed.
    #[error("operation not allowed while connection is {0}")]
    InvalidState(ConnectionState),

    /// A queued message was dropped because the connection left the
    /// states that can still deliver it.
    #[error("queued message failed: {0}")]
    Rejected(ErrorInfo),

    /// The payload could not be encoded.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// The transport refused the frame.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The connection actor has shut down.
    #[error("connection is unavailable")]
    Unavailable,
}
