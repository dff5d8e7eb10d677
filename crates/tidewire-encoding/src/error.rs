//! Error types for the encoding layer.

use tidewire_protocol::ProtocolError;

/// Errors that can occur while encoding or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// The payload is a type that other client libraries can't read back
    /// consistently (a bare number or boolean). Wrap it in an object.
    #[error("unsupported payload type: {0}; send a string, bytes or a JSON object/array")]
    UnsupportedPayload(&'static str),

    /// A stage expected a different kind of data under its label.
    #[error("{stage} stage cannot handle {found} data")]
    UnexpectedData {
        stage: &'static str,
        found: &'static str,
    },

    /// JSON (de)serialization of a payload failed.
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Bytes tagged `utf-8` were not valid UTF-8.
    #[error("invalid utf-8 payload: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Text tagged `base64` was not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload is encrypted but the channel has no cipher configured.
    #[error("payload is encrypted with {0} but no cipher params are set")]
    MissingCipherParams(String),

    /// The payload was encrypted with a different cipher than the one
    /// configured on the channel.
    #[error("payload is encrypted with {found} but the channel uses {expected}")]
    CipherMismatch { expected: String, found: String },

    /// Only 128 and 256 bit AES keys are supported.
    #[error("invalid cipher key length: {0} bits")]
    InvalidKeyLength(usize),

    /// Decryption failed: wrong key, truncated data or bad padding.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// Envelope (de)serialization failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
