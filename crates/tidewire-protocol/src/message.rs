//! Application payloads carried inside protocol envelopes.
//!
//! [`Message`] and [`PresenceMessage`] both hold a [`Data`] value and an
//! `encoding` label list describing the transforms that were applied to
//! it. The labels are `/`-separated and listed in the order the
//! transforms ran, e.g. `json/utf-8/cipher+aes-128-cbc/base64`.

use std::fmt;

use serde::de::value::{MapAccessDeserializer, SeqAccessDeserializer};
use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// A message payload.
///
/// On the wire this is whatever the value naturally is: a string, a
/// MessagePack `bin`, or a structured JSON value. `Json` holding a bare
/// number or boolean is representable here but is rejected by the
/// encoding pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    String(String),
    Binary(Vec<u8>),
    Json(Value),
}

impl Data {
    /// Serializes `value` into a structured payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ProtocolError> {
        serde_json::to_value(value)
            .map(Data::Json)
            .map_err(ProtocolError::Encode)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Data::Binary(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Data::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Short name of the variant, for log fields and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Data::String(_) => "string",
            Data::Binary(_) => "binary",
            Data::Json(_) => "json",
        }
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::String(s)
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::String(s.to_owned())
    }
}

impl From<Vec<u8>> for Data {
    fn from(b: Vec<u8>) -> Self {
        Data::Binary(b)
    }
}

impl From<&[u8]> for Data {
    fn from(b: &[u8]) -> Self {
        Data::Binary(b.to_vec())
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self {
        Data::Json(v)
    }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Data::String(s) => serializer.serialize_str(s),
            Data::Binary(b) => serializer.serialize_bytes(b),
            Data::Json(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Data {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DataVisitor)
    }
}

struct DataVisitor;

impl<'de> Visitor<'de> for DataVisitor {
    type Value = Data;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, byte array or JSON value")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Data, E> {
        Ok(Data::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Data, E> {
        Ok(Data::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Data, E> {
        Ok(Data::Binary(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Data, E> {
        Ok(Data::Binary(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Data, E> {
        Ok(Data::Json(Value::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Data, E> {
        Ok(Data::Json(Value::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Data, E> {
        Ok(Data::Json(Value::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Data, E> {
        Ok(Data::Json(Value::from(v)))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Data, E> {
        Ok(Data::Json(Value::Null))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Data, A::Error> {
        Value::deserialize(MapAccessDeserializer::new(map)).map(Data::Json)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Data, A::Error> {
        Value::deserialize(SeqAccessDeserializer::new(seq)).map(Data::Json)
    }
}

// ---------------------------------------------------------------------------
// Encoded
// ---------------------------------------------------------------------------

/// Anything that carries a payload plus its encoding label list.
///
/// The encoding pipeline works against this trait so messages and
/// presence messages go through the same stages.
pub trait Encoded {
    fn data(&self) -> Option<&Data>;

    /// The `/`-separated label list, empty when nothing was applied.
    fn encoding(&self) -> &str;

    /// Both mutable halves at once, so a stage can rewrite the payload
    /// and its labels together.
    fn payload_mut(&mut self) -> (&mut Option<Data>, &mut String);
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single application message published on a channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    /// Event name subscribers filter on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,

    #[serde(
        default,
        deserialize_with = "null_as_empty_string",
        skip_serializing_if = "String::is_empty"
    )]
    pub encoding: String,

    /// Milliseconds since the Unix epoch, set by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,
}

impl Message {
    pub fn new(name: impl Into<String>, data: impl Into<Data>) -> Self {
        Self {
            name: Some(name.into()),
            data: Some(data.into()),
            ..Self::default()
        }
    }

    /// Reads the payload as `T`.
    ///
    /// Structured payloads are converted directly. String payloads are
    /// parsed as JSON first and, failing that, offered to `T` as a plain
    /// string. Binary payloads only convert into byte containers such as
    /// `Vec<u8>`.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        data_value(self.data.as_ref())
    }
}

impl Encoded for Message {
    fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn payload_mut(&mut self) -> (&mut Option<Data>, &mut String) {
        (&mut self.data, &mut self.encoding)
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// What a presence message announces about a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum PresenceAction {
    Absent = 0,
    #[default]
    Present = 1,
    Enter = 2,
    Leave = 3,
    Update = 4,
}

impl From<PresenceAction> for u8 {
    fn from(action: PresenceAction) -> u8 {
        action as u8
    }
}

impl TryFrom<u8> for PresenceAction {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Absent,
            1 => Self::Present,
            2 => Self::Enter,
            3 => Self::Leave,
            4 => Self::Update,
            other => return Err(ProtocolError::UnknownPresenceAction(other)),
        })
    }
}

/// A presence event for one member of a channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    pub action: PresenceAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,

    #[serde(
        default,
        deserialize_with = "null_as_empty_string",
        skip_serializing_if = "String::is_empty"
    )]
    pub encoding: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,
}

impl PresenceMessage {
    pub fn new(action: PresenceAction, client_id: impl Into<String>) -> Self {
        Self {
            action,
            client_id: Some(client_id.into()),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: impl Into<Data>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Reads the payload as `T`. See [`Message::value`].
    pub fn value<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        data_value(self.data.as_ref())
    }
}

impl Encoded for PresenceMessage {
    fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn payload_mut(&mut self) -> (&mut Option<Data>, &mut String) {
        (&mut self.data, &mut self.encoding)
    }
}

fn data_value<T: DeserializeOwned>(data: Option<&Data>) -> Result<T, ProtocolError> {
    let value = match data {
        None => Value::Null,
        Some(Data::Json(v)) => v.clone(),
        Some(Data::String(s)) => {
            if let Ok(parsed) = serde_json::from_str::<T>(s) {
                return Ok(parsed);
            }
            Value::String(s.clone())
        }
        Some(Data::Binary(b)) => Value::Array(b.iter().map(|&byte| Value::from(byte)).collect()),
    };
    serde_json::from_value(value).map_err(ProtocolError::Decode)
}

fn null_as_empty_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
