//! The protocol envelope: [`ProtocolMessage`] and its [`Action`] codes.
//!
//! Every frame on a realtime connection carries exactly one
//! `ProtocolMessage`. The `action` says what it is (a heartbeat, a
//! connection lifecycle event, channel traffic…); the optional fields carry
//! whatever that action needs.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{ErrorInfo, Message, PresenceMessage, ProtocolError};

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// The verb of a protocol envelope.
///
/// The numeric codes are a compatibility contract with the service and
/// travel on the wire as plain integers (`"action": 4`), never as names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Action {
    Heartbeat = 0,
    Ack = 1,
    Nack = 2,
    Connect = 3,
    Connected = 4,
    Disconnect = 5,
    Disconnected = 6,
    Close = 7,
    Closed = 8,
    Error = 9,
    Attach = 10,
    Attached = 11,
    Detach = 12,
    Detached = 13,
    Presence = 14,
    Message = 15,
    Sync = 16,
    Auth = 17,
}

impl From<Action> for u8 {
    fn from(action: Action) -> u8 {
        action as u8
    }
}

impl TryFrom<u8> for Action {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, ProtocolError> {
        Ok(match code {
            0 => Self::Heartbeat,
            1 => Self::Ack,
            2 => Self::Nack,
            3 => Self::Connect,
            4 => Self::Connected,
            5 => Self::Disconnect,
            6 => Self::Disconnected,
            7 => Self::Close,
            8 => Self::Closed,
            9 => Self::Error,
            10 => Self::Attach,
            11 => Self::Attached,
            12 => Self::Detach,
            13 => Self::Detached,
            14 => Self::Presence,
            15 => Self::Message,
            16 => Self::Sync,
            17 => Self::Auth,
            other => return Err(ProtocolError::UnknownAction(other)),
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bit flags carried in [`ProtocolMessage::flags`].
pub mod flags {
    pub const HAS_PRESENCE: u32 = 1 << 0;
    pub const HAS_BACKLOG: u32 = 1 << 1;
    pub const RESUMED: u32 = 1 << 2;
    pub const TRANSIENT: u32 = 1 << 4;
}

// ---------------------------------------------------------------------------
// ConnectionDetails
// ---------------------------------------------------------------------------

/// Connection parameters the service hands out in a Connected envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_key: Option<String>,
    /// How long (ms) the service keeps connection state after a drop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state_ttl: Option<u64>,
    /// Longest gap (ms) the service leaves between frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

// ---------------------------------------------------------------------------
// ProtocolMessage
// ---------------------------------------------------------------------------

/// The envelope every frame carries.
///
/// Optional fields are omitted on the wire when `None`, and so are empty
/// `messages`/`presence` lists. On the way in, an absent or `null` list is
/// read as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    pub action: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Channel name for channel-scoped actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_serial: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_serial: Option<i64>,

    /// Serial of an outbound message, echoed back in Ack/Nack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_serial: Option<i64>,

    /// Number of messages an Ack/Nack covers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// See [`flags`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,

    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub messages: Vec<Message>,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub presence: Vec<PresenceMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_details: Option<ConnectionDetails>,
}

impl ProtocolMessage {
    /// An envelope with only the action set.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            id: None,
            channel: None,
            channel_serial: None,
            connection_id: None,
            connection_key: None,
            connection_serial: None,
            msg_serial: None,
            count: None,
            flags: None,
            timestamp: None,
            error: None,
            messages: Vec::new(),
            presence: Vec::new(),
            connection_details: None,
        }
    }

    /// A Message envelope for `channel`.
    pub fn messages(channel: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            channel: Some(channel.into()),
            messages,
            ..Self::new(Action::Message)
        }
    }

    /// A Presence envelope for `channel`.
    pub fn presence(channel: impl Into<String>, presence: Vec<PresenceMessage>) -> Self {
        Self {
            channel: Some(channel.into()),
            presence,
            ..Self::new(Action::Presence)
        }
    }

    /// Returns a copy of `self` with `error` attached.
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    /// Whether this envelope concerns a single channel rather than the
    /// whole connection.
    pub fn is_channel_scoped(&self) -> bool {
        self.channel.is_some()
    }

    /// Whether `flag` (see [`flags`]) is set.
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags.is_some_and(|f| f & flag != 0)
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// =========================================================================
// Tests
// =========================================================================
