//! Envelope serializer: pipeline plus codec for one connection.

use serde::de::DeserializeOwned;
use tidewire_protocol::{
    Codec, JsonCodec, Message, MsgPackCodec, PresenceMessage, Protocol, ProtocolError,
    ProtocolMessage, RealtimeTransportData,
};
use tidewire_transport::WireFrame;

use crate::pagination::{HttpRequest, HttpResponse, PaginatedResult};
use crate::{ChannelOptions, EncodingError, Pipeline};

/// Turns envelopes into frames and frames into envelopes for a
/// connection with a fixed wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageHandler {
    pipeline: Pipeline,
}

impl MessageHandler {
    pub fn new(protocol: Protocol) -> Self {
        tracing::debug!(
            %protocol,
            stages = ?Pipeline::stage_names().collect::<Vec<_>>(),
            "message handler initialised"
        );
        Self {
            pipeline: Pipeline::new(protocol),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.pipeline.protocol()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Encodes the payload of every message and presence entry, in order.
    pub fn encode_protocol_message(
        &self,
        message: &mut ProtocolMessage,
        options: &ChannelOptions,
    ) -> Result<(), EncodingError> {
        Pipeline::validate_all(&message.messages)?;
        Pipeline::validate_all(&message.presence)?;
        self.pipeline.encode_all(&mut message.messages, options)?;
        self.pipeline.encode_all(&mut message.presence, options)
    }

    /// Decodes the payload of every message and presence entry.
    ///
    /// All entries are attempted; the first failure is returned.
    pub fn decode_protocol_message(
        &self,
        message: &mut ProtocolMessage,
        options: &ChannelOptions,
    ) -> Result<(), EncodingError> {
        let messages = self.pipeline.decode_all(&mut message.messages, options);
        let presence = self.pipeline.decode_all(&mut message.presence, options);
        messages.and(presence)
    }

    /// Encodes payloads and serializes the envelope into a frame.
    pub fn to_transport_data(
        &self,
        mut message: ProtocolMessage,
        options: &ChannelOptions,
    ) -> Result<RealtimeTransportData, EncodingError> {
        self.encode_protocol_message(&mut message, options)?;
        let frame = self.protocol().to_frame(&message)?;
        Ok(RealtimeTransportData::new(frame, Some(message)))
    }

    /// Parses a frame into an envelope without touching payloads.
    pub fn parse_realtime_data(&self, frame: &WireFrame) -> Result<ProtocolMessage, ProtocolError> {
        self.protocol().from_frame(frame)
    }

    /// Parses a frame and decodes its payloads with `options`.
    pub fn decode_realtime_data(
        &self,
        frame: &WireFrame,
        options: &ChannelOptions,
    ) -> Result<ProtocolMessage, EncodingError> {
        let mut message = self.parse_realtime_data(frame)?;
        self.decode_protocol_message(&mut message, options)?;
        Ok(message)
    }

    /// Serializes messages for a publish request body, encoding payloads
    /// first.
    pub fn messages_request_body(
        &self,
        messages: &mut [Message],
        options: &ChannelOptions,
    ) -> Result<Vec<u8>, EncodingError> {
        self.pipeline.encode_all(messages, options)?;
        let body = match self.protocol() {
            Protocol::Json => JsonCodec.encode(&messages)?,
            Protocol::MsgPack => MsgPackCodec.encode(&messages)?,
        };
        Ok(body)
    }

    /// Decodes a history response body into messages.
    pub fn parse_messages_response(
        &self,
        response: &HttpResponse,
        options: &ChannelOptions,
    ) -> Result<Vec<Message>, EncodingError> {
        let mut messages: Vec<Message> = parse_body(response)?;
        self.pipeline.decode_all(&mut messages, options)?;
        Ok(messages)
    }

    /// Decodes a presence response body into presence messages.
    pub fn parse_presence_response(
        &self,
        response: &HttpResponse,
        options: &ChannelOptions,
    ) -> Result<Vec<PresenceMessage>, EncodingError> {
        let mut presence: Vec<PresenceMessage> = parse_body(response)?;
        self.pipeline.decode_all(&mut presence, options)?;
        Ok(presence)
    }

    /// One page of message history.
    pub fn paginated_messages(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<PaginatedResult<Message>, EncodingError> {
        let items = self.parse_messages_response(response, &request.channel_options)?;
        Ok(PaginatedResult::new(request, response, items))
    }

    /// One page of presence.
    pub fn paginated_presence(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<PaginatedResult<PresenceMessage>, EncodingError> {
        let items = self.parse_presence_response(response, &request.channel_options)?;
        Ok(PaginatedResult::new(request, response, items))
    }
}

/// Response bodies use the format their content type names, which can
/// differ from the realtime connection's.
fn parse_body<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ProtocolError> {
    match response.format() {
        Protocol::Json => JsonCodec.decode(&response.body),
        Protocol::MsgPack => MsgPackCodec.decode(&response.body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidewire_protocol::{Action, Data, PresenceAction};

    #[test]
    fn test_to_transport_data_keeps_encoded_original() {
        let handler = MessageHandler::new(Protocol::Json);
        let envelope = ProtocolMessage::messages("c", vec![Message::new("n", json!({"k": "v"}))]);
        let data = handler
            .to_transport_data(envelope, &ChannelOptions::default())
            .unwrap();

        let WireFrame::Text(text) = &data.frame else {
            panic!("json protocol should produce text frames");
        };
        assert!(text.contains(r#""encoding":"json""#));
        let original = data.original.unwrap();
        assert_eq!(original.messages[0].encoding, "json");
    }

    #[test]
    fn test_decode_realtime_data_restores_payloads() {
        for protocol in [Protocol::Json, Protocol::MsgPack] {
            let handler = MessageHandler::new(protocol);
            let envelope = ProtocolMessage::messages(
                "c",
                vec![
                    Message::new("a", json!({"k": [1, 2]})),
                    Message::new("b", vec![5u8, 6]),
                    Message::new("c", "text"),
                ],
            );
            let data = handler
                .to_transport_data(envelope.clone(), &ChannelOptions::default())
                .unwrap();
            let decoded = handler
                .decode_realtime_data(&data.frame, &ChannelOptions::default())
                .unwrap();
            assert_eq!(decoded, envelope, "{protocol}");
        }
    }

    #[test]
    fn test_parse_realtime_data_leaves_payloads_encoded() {
        let handler = MessageHandler::new(Protocol::Json);
        let frame = WireFrame::Text(
            r#"{"action":15,"messages":[{"data":"AQID","encoding":"base64"}]}"#.into(),
        );
        let parsed = handler.parse_realtime_data(&frame).unwrap();
        assert_eq!(parsed.action, Action::Message);
        assert_eq!(parsed.messages[0].encoding, "base64");
    }

    #[test]
    fn test_presence_entries_are_encoded_too() {
        let handler = MessageHandler::new(Protocol::Json);
        let mut envelope = ProtocolMessage::presence(
            "c",
            vec![PresenceMessage::new(PresenceAction::Enter, "a").with_data(json!({"s": 1}))],
        );
        handler
            .encode_protocol_message(&mut envelope, &ChannelOptions::default())
            .unwrap();
        assert_eq!(envelope.presence[0].encoding, "json");
    }

    #[test]
    fn test_unsupported_payload_fails_the_whole_envelope() {
        let handler = MessageHandler::new(Protocol::Json);
        let envelope = ProtocolMessage::messages("c", vec![Message::new("n", json!(42))]);
        assert!(matches!(
            handler.to_transport_data(envelope, &ChannelOptions::default()),
            Err(EncodingError::UnsupportedPayload("number"))
        ));
    }

    #[test]
    fn test_messages_request_body_in_both_formats() {
        let json_handler = MessageHandler::new(Protocol::Json);
        let mut messages = vec![Message::new("n", vec![1u8, 2, 3])];
        let body = json_handler
            .messages_request_body(&mut messages, &ChannelOptions::default())
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!([{"name": "n", "data": "AQID", "encoding": "base64"}]));

        let msgpack_handler = MessageHandler::new(Protocol::MsgPack);
        let mut messages = vec![Message::new("n", vec![1u8, 2, 3])];
        let body = msgpack_handler
            .messages_request_body(&mut messages, &ChannelOptions::default())
            .unwrap();
        let decoded: Vec<Message> = rmp_serde::from_slice(&body).unwrap();
        assert_eq!(decoded[0].data, Some(Data::Binary(vec![1, 2, 3])));
    }

    #[test]
    fn test_request_body_with_bad_item_leaves_batch_untouched() {
        let handler = MessageHandler::new(Protocol::Json);
        let mut messages = vec![
            Message::new("ok", json!({"a": 1})),
            Message::new("bytes", vec![1u8, 2]),
            Message::new("bad", json!(true)),
        ];
        let before = messages.clone();

        let result = handler.messages_request_body(&mut messages, &ChannelOptions::default());
        assert!(matches!(result, Err(EncodingError::UnsupportedPayload("boolean"))));
        assert_eq!(messages, before);
    }

    #[test]
    fn test_bad_presence_entry_leaves_messages_untouched() {
        let handler = MessageHandler::new(Protocol::Json);
        let mut envelope = ProtocolMessage::messages("c", vec![Message::new("ok", json!([1]))]);
        envelope.presence =
            vec![PresenceMessage::new(PresenceAction::Update, "a").with_data(json!(3))];
        let before = envelope.clone();

        assert!(handler
            .encode_protocol_message(&mut envelope, &ChannelOptions::default())
            .is_err());
        assert_eq!(envelope, before);
    }
}
