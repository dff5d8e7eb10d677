//! Error types for the protocol layer.
//!
//! Anything that goes wrong while turning envelopes into frames or frames
//! into envelopes ends up here. Payload-level failures (bad cipher key,
//! unsupported data type) belong to `tidewire-encoding`.

use crate::Protocol;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// JSON deserialization failed: malformed text, missing required
    /// fields, or wrong field types.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// MessagePack serialization failed.
    #[error("msgpack encode failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack deserialization failed.
    #[error("msgpack decode failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// The action code is not one the service defines.
    #[error("unknown action code {0}")]
    UnknownAction(u8),

    /// The presence action code is not one the service defines.
    #[error("unknown presence action code {0}")]
    UnknownPresenceAction(u8),

    /// A frame of the wrong kind for the connection's protocol
    /// (e.g. a binary frame on a JSON connection).
    #[error("{protocol} protocol cannot read a {found} frame")]
    FrameMismatch {
        protocol: Protocol,
        found: &'static str,
    },

    /// The message is well-formed but unusable.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
