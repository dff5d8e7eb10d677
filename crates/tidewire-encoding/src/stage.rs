//! The individual payload transforms.
//!
//! Each stage owns one encoding label. On the way out it applies its
//! transform and appends its label; on the way in it only acts when its
//! label is the last one in the list, undoes the transform and pops it.
//! That keeps decoding correct for any label list the service sends,
//! including ones with labels this client doesn't know (those are left
//! in place, along with everything before them).

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use tidewire_protocol::{Data, Protocol};

use crate::{ChannelOptions, EncodingError};

pub const JSON_LABEL: &str = "json";
pub const UTF8_LABEL: &str = "utf-8";
pub const BASE64_LABEL: &str = "base64";
pub const CIPHER_LABEL_PREFIX: &str = "cipher+";

/// A payload detached from its message while the stages work on it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    pub data: Option<Data>,
    /// `/`-separated labels, in the order their transforms were applied.
    pub encoding: String,
}

impl Payload {
    pub fn new(data: Option<Data>, encoding: impl Into<String>) -> Self {
        Self {
            data,
            encoding: encoding.into(),
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.encoding.split('/').filter(|label| !label.is_empty())
    }

    pub fn has_label(&self, pred: impl Fn(&str) -> bool) -> bool {
        self.labels().any(pred)
    }

    pub fn last_label(&self) -> Option<&str> {
        self.labels().last()
    }

    pub fn push_label(&mut self, label: &str) {
        if !self.encoding.is_empty() {
            self.encoding.push('/');
        }
        self.encoding.push_str(label);
    }

    pub fn pop_label(&mut self) {
        match self.encoding.rfind('/') {
            Some(idx) => self.encoding.truncate(idx),
            None => self.encoding.clear(),
        }
    }
}

/// What a stage gets to look at besides the payload.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Wire format of the connection or response.
    pub protocol: Protocol,
    pub options: &'a ChannelOptions,
}

/// One reversible payload transform.
pub trait Stage: Send + Sync {
    /// The label this stage is known by in logs.
    fn name(&self) -> &'static str;

    fn encode(&self, payload: &mut Payload, ctx: StageContext<'_>) -> Result<(), EncodingError>;

    fn decode(&self, payload: &mut Payload, ctx: StageContext<'_>) -> Result<(), EncodingError>;
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Structured values travel as JSON text tagged `json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStage;

impl Stage for JsonStage {
    fn name(&self) -> &'static str {
        JSON_LABEL
    }

    fn encode(&self, payload: &mut Payload, _ctx: StageContext<'_>) -> Result<(), EncodingError> {
        if payload.has_label(|l| l == JSON_LABEL) {
            return Ok(());
        }
        if let Some(Data::Json(value)) = &payload.data {
            let text = serde_json::to_string(value)?;
            payload.data = Some(Data::String(text));
            payload.push_label(JSON_LABEL);
        }
        Ok(())
    }

    fn decode(&self, payload: &mut Payload, _ctx: StageContext<'_>) -> Result<(), EncodingError> {
        if payload.last_label() != Some(JSON_LABEL) {
            return Ok(());
        }
        let value = match &payload.data {
            Some(Data::String(text)) => serde_json::from_str(text)?,
            Some(Data::Binary(bytes)) => serde_json::from_slice(bytes)?,
            Some(other) => {
                return Err(EncodingError::UnexpectedData {
                    stage: JSON_LABEL,
                    found: other.kind(),
                });
            }
            None => {
                payload.pop_label();
                return Ok(());
            }
        };
        payload.data = Some(Data::Json(value));
        payload.pop_label();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UTF-8
// ---------------------------------------------------------------------------

/// Text that was turned into bytes is tagged `utf-8`.
///
/// Encoding needs nothing from this stage: the only producer of that
/// conversion is the cipher stage, which pushes the label itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Stage;

impl Stage for Utf8Stage {
    fn name(&self) -> &'static str {
        UTF8_LABEL
    }

    fn encode(&self, _payload: &mut Payload, _ctx: StageContext<'_>) -> Result<(), EncodingError> {
        Ok(())
    }

    fn decode(&self, payload: &mut Payload, _ctx: StageContext<'_>) -> Result<(), EncodingError> {
        if payload.last_label() != Some(UTF8_LABEL) {
            return Ok(());
        }
        match &payload.data {
            Some(Data::Binary(bytes)) => {
                let text = String::from_utf8(bytes.clone())?;
                payload.data = Some(Data::String(text));
            }
            Some(Data::Json(_)) => {
                return Err(EncodingError::UnexpectedData {
                    stage: UTF8_LABEL,
                    found: "json",
                });
            }
            Some(Data::String(_)) | None => {}
        }
        payload.pop_label();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

/// Encrypts payloads on channels that have [`CipherParams`](crate::CipherParams).
#[derive(Debug, Clone, Copy, Default)]
pub struct CipherStage;

impl Stage for CipherStage {
    fn name(&self) -> &'static str {
        "cipher"
    }

    fn encode(&self, payload: &mut Payload, ctx: StageContext<'_>) -> Result<(), EncodingError> {
        let Some(params) = &ctx.options.cipher else {
            return Ok(());
        };
        if payload.has_label(|l| l.starts_with(CIPHER_LABEL_PREFIX)) {
            return Ok(());
        }
        let plain = match payload.data.take() {
            None => return Ok(()),
            Some(Data::Binary(bytes)) => bytes,
            Some(Data::String(text)) => {
                payload.push_label(UTF8_LABEL);
                text.into_bytes()
            }
            Some(Data::Json(value)) => {
                payload.data = Some(Data::Json(value));
                return Err(EncodingError::UnexpectedData {
                    stage: "cipher",
                    found: "json",
                });
            }
        };
        payload.data = Some(Data::Binary(params.encrypt(&plain)?));
        payload.push_label(&params.label());
        Ok(())
    }

    fn decode(&self, payload: &mut Payload, ctx: StageContext<'_>) -> Result<(), EncodingError> {
        let Some(label) = payload
            .last_label()
            .filter(|l| l.starts_with(CIPHER_LABEL_PREFIX))
            .map(str::to_owned)
        else {
            return Ok(());
        };
        let Some(params) = &ctx.options.cipher else {
            return Err(EncodingError::MissingCipherParams(label));
        };
        let expected = params.label();
        if label != expected {
            return Err(EncodingError::CipherMismatch {
                expected,
                found: label,
            });
        }
        let plain = match &payload.data {
            Some(Data::Binary(bytes)) => params.decrypt(bytes)?,
            Some(other) => {
                return Err(EncodingError::UnexpectedData {
                    stage: "cipher",
                    found: other.kind(),
                });
            }
            None => Vec::new(),
        };
        payload.data = Some(Data::Binary(plain));
        payload.pop_label();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Base64
// ---------------------------------------------------------------------------

/// Binary payloads on a text wire travel as base64 tagged `base64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Stage;

impl Stage for Base64Stage {
    fn name(&self) -> &'static str {
        BASE64_LABEL
    }

    fn encode(&self, payload: &mut Payload, ctx: StageContext<'_>) -> Result<(), EncodingError> {
        if ctx.protocol.is_binary() || payload.has_label(|l| l == BASE64_LABEL) {
            return Ok(());
        }
        if let Some(Data::Binary(bytes)) = &payload.data {
            payload.data = Some(Data::String(BASE64_STANDARD.encode(bytes)));
            payload.push_label(BASE64_LABEL);
        }
        Ok(())
    }

    fn decode(&self, payload: &mut Payload, _ctx: StageContext<'_>) -> Result<(), EncodingError> {
        if payload.last_label() != Some(BASE64_LABEL) {
            return Ok(());
        }
        let bytes = match &payload.data {
            Some(Data::String(text)) => BASE64_STANDARD.decode(text)?,
            Some(other) => {
                return Err(EncodingError::UnexpectedData {
                    stage: BASE64_LABEL,
                    found: other.kind(),
                });
            }
            None => Vec::new(),
        };
        payload.data = Some(Data::Binary(bytes));
        payload.pop_label();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(protocol: Protocol, options: &ChannelOptions) -> StageContext<'_> {
        StageContext { protocol, options }
    }

    #[test]
    fn test_label_list_push_pop() {
        let mut payload = Payload::default();
        assert_eq!(payload.last_label(), None);
        payload.push_label("json");
        payload.push_label("base64");
        assert_eq!(payload.encoding, "json/base64");
        assert_eq!(payload.last_label(), Some("base64"));
        payload.pop_label();
        assert_eq!(payload.encoding, "json");
        payload.pop_label();
        assert_eq!(payload.encoding, "");
    }

    #[test]
    fn test_json_stage_stringifies_structured_data() {
        let options = ChannelOptions::default();
        let mut payload = Payload::new(Some(Data::Json(json!({"a": 1}))), "");
        JsonStage.encode(&mut payload, ctx(Protocol::Json, &options)).unwrap();
        assert_eq!(payload.data, Some(Data::String(r#"{"a":1}"#.into())));
        assert_eq!(payload.encoding, "json");

        JsonStage.decode(&mut payload, ctx(Protocol::Json, &options)).unwrap();
        assert_eq!(payload.data, Some(Data::Json(json!({"a": 1}))));
        assert_eq!(payload.encoding, "");
    }

    #[test]
    fn test_json_stage_leaves_strings_alone() {
        let options = ChannelOptions::default();
        let mut payload = Payload::new(Some(Data::String("plain".into())), "");
        JsonStage.encode(&mut payload, ctx(Protocol::Json, &options)).unwrap();
        assert_eq!(payload.encoding, "");
    }

    #[test]
    fn test_json_decode_of_bad_text_keeps_label() {
        let options = ChannelOptions::default();
        let mut payload = Payload::new(Some(Data::String("{nope".into())), "json");
        assert!(JsonStage.decode(&mut payload, ctx(Protocol::Json, &options)).is_err());
        assert_eq!(payload.encoding, "json");
    }

    #[test]
    fn test_utf8_stage_decodes_tagged_bytes() {
        let options = ChannelOptions::default();
        let mut payload = Payload::new(Some(Data::Binary("héllo".as_bytes().to_vec())), "utf-8");
        Utf8Stage.decode(&mut payload, ctx(Protocol::MsgPack, &options)).unwrap();
        assert_eq!(payload.data, Some(Data::String("héllo".into())));
        assert_eq!(payload.encoding, "");
    }

    #[test]
    fn test_utf8_stage_rejects_invalid_bytes_without_losing_them() {
        let options = ChannelOptions::default();
        let mut payload = Payload::new(Some(Data::Binary(vec![0xff, 0xfe])), "utf-8");
        assert!(matches!(
            Utf8Stage.decode(&mut payload, ctx(Protocol::MsgPack, &options)),
            Err(EncodingError::Utf8(_))
        ));
        assert_eq!(payload.data, Some(Data::Binary(vec![0xff, 0xfe])));
        assert_eq!(payload.encoding, "utf-8");
    }

    #[test]
    fn test_base64_stage_only_on_text_wire() {
        let options = ChannelOptions::default();
        let mut on_msgpack = Payload::new(Some(Data::Binary(vec![1, 2, 3])), "");
        Base64Stage.encode(&mut on_msgpack, ctx(Protocol::MsgPack, &options)).unwrap();
        assert_eq!(on_msgpack.encoding, "");

        let mut on_json = Payload::new(Some(Data::Binary(vec![1, 2, 3])), "");
        Base64Stage.encode(&mut on_json, ctx(Protocol::Json, &options)).unwrap();
        assert_eq!(on_json.data, Some(Data::String("AQID".into())));
        assert_eq!(on_json.encoding, "base64");
    }

    #[test]
    fn test_base64_decode_runs_on_either_wire() {
        let options = ChannelOptions::default();
        let mut payload = Payload::new(Some(Data::String("AQID".into())), "base64");
        Base64Stage.decode(&mut payload, ctx(Protocol::MsgPack, &options)).unwrap();
        assert_eq!(payload.data, Some(Data::Binary(vec![1, 2, 3])));
    }

    #[test]
    fn test_cipher_stage_tags_strings_with_utf8() {
        let options = ChannelOptions::with_cipher(crate::CipherParams::new([1u8; 16]).unwrap());
        let mut payload = Payload::new(Some(Data::String("secret".into())), "");
        CipherStage.encode(&mut payload, ctx(Protocol::MsgPack, &options)).unwrap();
        assert_eq!(payload.encoding, "utf-8/cipher+aes-128-cbc");
        assert!(payload.data.as_ref().is_some_and(Data::is_binary));

        CipherStage.decode(&mut payload, ctx(Protocol::MsgPack, &options)).unwrap();
        assert_eq!(payload.encoding, "utf-8");
        assert_eq!(payload.data, Some(Data::Binary(b"secret".to_vec())));
    }

    #[test]
    fn test_cipher_stage_without_params_is_a_no_op_on_encode() {
        let options = ChannelOptions::default();
        let mut payload = Payload::new(Some(Data::String("open".into())), "");
        CipherStage.encode(&mut payload, ctx(Protocol::Json, &options)).unwrap();
        assert_eq!(payload, Payload::new(Some(Data::String("open".into())), ""));
    }
}
