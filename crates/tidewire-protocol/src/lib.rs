//! Wire protocol for tidewire.
//!
//! This crate defines what travels between the client and the realtime
//! service:
//!
//! - **Types** ([`ProtocolMessage`], [`Action`], [`Message`],
//!   [`PresenceMessage`], [`ErrorInfo`], [`Data`]): the envelope and the
//!   application payloads it carries.
//! - **Codecs** ([`Codec`], [`JsonCodec`], [`MsgPackCodec`], [`Protocol`]):
//!   how an envelope becomes a text or binary frame and back.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (ProtocolMessage) → Connection (state machine)
//! ```
//!
//! Payload transforms (JSON structuring, encryption, base64) are not done
//! here; they live in `tidewire-encoding`, which runs before serialization
//! and after parsing.

mod codec;
mod error;
mod error_info;
mod message;
mod types;

pub use codec::{Codec, JsonCodec, MsgPackCodec, Protocol, RealtimeTransportData};
pub use error::ProtocolError;
pub use error_info::ErrorInfo;
pub use message::{Data, Encoded, Message, PresenceAction, PresenceMessage};
pub use types::{flags, Action, ConnectionDetails, ProtocolMessage};
