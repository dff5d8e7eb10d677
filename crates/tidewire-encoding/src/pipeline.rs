//! The fixed-order payload pipeline.

use serde_json::Value;
use tidewire_protocol::{Data, Encoded, Protocol};

use crate::stage::{Base64Stage, CipherStage, JsonStage, Payload, Stage, StageContext, Utf8Stage};
use crate::{ChannelOptions, EncodingError};

/// Encode order. Decoding walks it backwards.
static STAGES: [&dyn Stage; 4] = [&JsonStage, &Utf8Stage, &CipherStage, &Base64Stage];

/// Runs payloads through the JSON → UTF-8 → Cipher → Base64 stages.
///
/// The pipeline itself is stateless apart from the wire format, which
/// decides whether binary data needs base64 wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pipeline {
    protocol: Protocol,
}

impl Pipeline {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Stage names in encode order.
    pub fn stage_names() -> impl Iterator<Item = &'static str> {
        STAGES.iter().map(|stage| stage.name())
    }

    /// Rejects payloads other client libraries can't read back the same
    /// way: a bare JSON number or boolean.
    pub fn validate(data: Option<&Data>) -> Result<(), EncodingError> {
        match data {
            Some(Data::Json(Value::Number(_))) => Err(EncodingError::UnsupportedPayload("number")),
            Some(Data::Json(Value::Bool(_))) => Err(EncodingError::UnsupportedPayload("boolean")),
            _ => Ok(()),
        }
    }

    /// Encodes one payload in place.
    ///
    /// Either every stage succeeds and the item is updated, or the item
    /// is left exactly as it was.
    pub fn encode<E: Encoded + ?Sized>(
        &self,
        item: &mut E,
        options: &ChannelOptions,
    ) -> Result<(), EncodingError> {
        Self::validate(item.data())?;

        let ctx = StageContext {
            protocol: self.protocol,
            options,
        };
        let mut payload = Payload::new(item.data().cloned(), item.encoding());
        for stage in STAGES.iter() {
            stage.encode(&mut payload, ctx)?;
        }

        let (data, encoding) = item.payload_mut();
        *data = payload.data;
        *encoding = payload.encoding;
        Ok(())
    }

    /// Decodes one payload in place.
    ///
    /// Stops at the first stage that fails. Whatever was undone before
    /// that point stays undone, and the labels still on the item describe
    /// the data it now holds.
    pub fn decode<E: Encoded + ?Sized>(
        &self,
        item: &mut E,
        options: &ChannelOptions,
    ) -> Result<(), EncodingError> {
        let ctx = StageContext {
            protocol: self.protocol,
            options,
        };
        let (data, encoding) = item.payload_mut();
        let mut payload = Payload::new(data.take(), std::mem::take(encoding));

        let result = STAGES
            .iter()
            .rev()
            .try_for_each(|stage| stage.decode(&mut payload, ctx));

        if result.is_ok() && !payload.encoding.is_empty() {
            tracing::debug!(encoding = %payload.encoding, "unrecognised encoding left on payload");
        }

        *data = payload.data;
        *encoding = payload.encoding;
        result
    }

    /// Checks every item's payload type without touching any of them.
    pub fn validate_all<E: Encoded>(items: &[E]) -> Result<(), EncodingError> {
        items.iter().try_for_each(|item| Self::validate(item.data()))
    }

    /// Encodes every item, in order. Stops at the first failure.
    ///
    /// Payload types are checked for the whole batch first, so an
    /// unsupported item late in the slice leaves the earlier ones as they
    /// were.
    pub fn encode_all<E: Encoded>(
        &self,
        items: &mut [E],
        options: &ChannelOptions,
    ) -> Result<(), EncodingError> {
        Self::validate_all(items)?;
        items
            .iter_mut()
            .try_for_each(|item| self.encode(item, options))
    }

    /// Decodes every item, in order. A failing item doesn't stop the
    /// rest; the first failure is returned once all have been tried.
    pub fn decode_all<E: Encoded>(
        &self,
        items: &mut [E],
        options: &ChannelOptions,
    ) -> Result<(), EncodingError> {
        let mut first_error = None;
        for (index, item) in items.iter_mut().enumerate() {
            if let Err(e) = self.decode(item, options) {
                tracing::debug!(index, error = %e, "payload decode failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
