/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport is not connected, so nothing can be sent.
    #[error("transport not connected")]
    NotConnected,

    /// The socket task is gone, so the frame can't be handed over.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The endpoint URL could not be built.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}
