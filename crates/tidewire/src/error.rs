//! Unified error type for the tidewire client.

use tidewire_connection::ConnectionError;
use tidewire_encoding::EncodingError;
use tidewire_protocol::ProtocolError;
use tidewire_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Users of the `tidewire` crate deal with this one type; `?` converts
/// the sub-crate errors through the generated `From` impls.
#[derive(Debug, thiserror::Error)]
pub enum TidewireError {
    /// A transport-level error (bad endpoint, not connected).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An envelope could not be serialized or parsed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// The connection refused or dropped the operation.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The client was built without a way to open transports.
    #[error("no transport factory configured")]
    MissingTransport,

    /// The log filter directive did not parse.
    #[error("invalid log filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),

    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    LoggingInit(#[from] tracing_subscriber::util::TryInitError),
}
