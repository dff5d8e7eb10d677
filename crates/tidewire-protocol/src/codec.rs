//! Codecs that turn protocol envelopes into wire frames and back.
//!
//! The [`Codec`] trait is the seam: it knows how to serialize any serde
//! type into bytes. [`JsonCodec`] and [`MsgPackCodec`] implement it, and
//! [`Protocol`] picks one per connection and maps its output onto the
//! right kind of frame (text for JSON, binary for MessagePack).

use std::fmt;

use serde::{de::DeserializeOwned, Serialize};
use tidewire_transport::WireFrame;

use crate::{ProtocolError, ProtocolMessage};

/// Encodes serde types to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` so a codec can live inside a connection task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns an encode variant of [`ProtocolError`] if the value cannot
    /// be represented in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes into a value.
    ///
    /// # Errors
    /// Returns a decode variant of [`ProtocolError`] if the bytes are
    /// malformed or don't match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

// ---------------------------------------------------------------------------
// MsgPackCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses MessagePack (via `rmp-serde`).
///
/// Structs are written as maps keyed by field name, never as positional
/// arrays, so the service sees the same field names a JSON peer would.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// The wire format a connection speaks. Fixed for the connection's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    Json,
    #[default]
    MsgPack,
}

impl Protocol {
    pub fn from_binary_flag(use_binary_protocol: bool) -> Self {
        if use_binary_protocol {
            Protocol::MsgPack
        } else {
            Protocol::Json
        }
    }

    /// Whether frames in this format are binary.
    pub fn is_binary(self) -> bool {
        matches!(self, Protocol::MsgPack)
    }

    /// Serializes an envelope into a frame of this protocol's kind.
    pub fn to_frame(self, message: &ProtocolMessage) -> Result<WireFrame, ProtocolError> {
        match self {
            Protocol::Json => {
                let bytes = JsonCodec.encode(message)?;
                String::from_utf8(bytes)
                    .map(WireFrame::Text)
                    .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
            }
            Protocol::MsgPack => MsgPackCodec.encode(message).map(WireFrame::Binary),
        }
    }

    /// Parses a frame into an envelope.
    ///
    /// # Errors
    /// A frame of the other kind (binary on JSON, text on MessagePack) is
    /// rejected with [`ProtocolError::FrameMismatch`].
    pub fn from_frame(self, frame: &WireFrame) -> Result<ProtocolMessage, ProtocolError> {
        match (self, frame) {
            (Protocol::Json, WireFrame::Text(text)) => JsonCodec.decode(text.as_bytes()),
            (Protocol::MsgPack, WireFrame::Binary(bytes)) => MsgPackCodec.decode(bytes),
            (protocol, WireFrame::Text(_)) => Err(ProtocolError::FrameMismatch {
                protocol,
                found: "text",
            }),
            (protocol, WireFrame::Binary(_)) => Err(ProtocolError::FrameMismatch {
                protocol,
                found: "binary",
            }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Json => "json",
            Protocol::MsgPack => "msgpack",
        })
    }
}

// ---------------------------------------------------------------------------
// RealtimeTransportData
// ---------------------------------------------------------------------------

/// A frame ready to hand to the transport, plus the envelope it came from.
///
/// `original` is kept for logging and for replies that need to refer back
/// to what was sent; the transport only ever looks at `frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeTransportData {
    pub frame: WireFrame,
    pub original: Option<ProtocolMessage>,
}

impl RealtimeTransportData {
    pub fn new(frame: WireFrame, original: Option<ProtocolMessage>) -> Self {
        Self { frame, original }
    }
}
