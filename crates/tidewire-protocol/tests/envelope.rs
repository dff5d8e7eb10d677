//! Round trips of full envelopes through both wire formats.
//!
//! Whatever one format can carry the other must carry too: a connection
//! should behave the same whether it speaks JSON or MessagePack.

use serde_json::json;
use tidewire_protocol::{
    Action, ConnectionDetails, Data, ErrorInfo, Message, PresenceAction, PresenceMessage,
    Protocol, ProtocolError, ProtocolMessage,
};
use tidewire_transport::WireFrame;

fn sample_envelope() -> ProtocolMessage {
    let mut with_encoding = Message::new("encoded", "eyJhIjoxfQ==");
    with_encoding.encoding = "json/base64".into();

    let mut msg = ProtocolMessage::messages(
        "room:lobby",
        vec![
            Message::new("text", "hello"),
            Message::new("structured", json!({"x": 1, "y": [true, null]})),
            with_encoding,
        ],
    );
    msg.id = Some("conn-1:0".into());
    msg.connection_serial = Some(-1);
    msg.msg_serial = Some(12);
    msg.timestamp = Some(1_700_000_000_000);
    msg.presence = vec![PresenceMessage::new(PresenceAction::Update, "bob").with_data("away")];
    msg
}

#[test]
fn test_message_envelope_round_trips_in_both_formats() {
    let envelope = sample_envelope();
    for protocol in [Protocol::Json, Protocol::MsgPack] {
        let frame = protocol.to_frame(&envelope).unwrap();
        assert_eq!(frame.is_binary(), protocol.is_binary(), "{protocol}");
        let decoded = protocol.from_frame(&frame).unwrap();
        assert_eq!(decoded, envelope, "{protocol}");
    }
}

#[test]
fn test_connected_envelope_round_trips_in_both_formats() {
    let mut envelope = ProtocolMessage::new(Action::Connected);
    envelope.connection_id = Some("abc".into());
    envelope.connection_key = Some("abc!key".into());
    envelope.connection_details = Some(ConnectionDetails {
        client_id: Some("me".into()),
        connection_key: Some("abc!key".into()),
        connection_state_ttl: Some(120_000),
        max_idle_interval: Some(15_000),
        max_message_size: Some(65_536),
        server_id: Some("frontend.1".into()),
    });

    for protocol in [Protocol::Json, Protocol::MsgPack] {
        let frame = protocol.to_frame(&envelope).unwrap();
        assert_eq!(protocol.from_frame(&frame).unwrap(), envelope, "{protocol}");
    }
}

#[test]
fn test_error_envelope_round_trips_in_both_formats() {
    let envelope = ProtocolMessage::new(Action::Error)
        .with_error(ErrorInfo::reason_failed().with_cause(ErrorInfo::reason_timeout()));

    for protocol in [Protocol::Json, Protocol::MsgPack] {
        let frame = protocol.to_frame(&envelope).unwrap();
        assert_eq!(protocol.from_frame(&frame).unwrap(), envelope, "{protocol}");
    }
}

#[test]
fn test_binary_payload_survives_msgpack() {
    let envelope = ProtocolMessage::messages("bin", vec![Message::new("raw", vec![0u8, 159, 146, 150])]);
    let frame = Protocol::MsgPack.to_frame(&envelope).unwrap();
    let decoded = Protocol::MsgPack.from_frame(&frame).unwrap();
    assert_eq!(
        decoded.messages[0].data,
        Some(Data::Binary(vec![0, 159, 146, 150]))
    );
}

#[test]
fn test_service_json_with_nulls_parses() {
    let text = r#"{
        "action": 15,
        "channel": "news",
        "messages": [{"name": "n", "data": "d", "encoding": null}],
        "presence": null,
        "error": null
    }"#;
    let decoded = Protocol::Json.from_frame(&WireFrame::Text(text.into())).unwrap();
    assert_eq!(decoded.messages.len(), 1);
    assert!(decoded.presence.is_empty());
    assert!(decoded.error.is_none());
}

#[test]
fn test_unknown_action_is_a_decode_error() {
    let result = Protocol::Json.from_frame(&WireFrame::Text(r#"{"action": 200}"#.into()));
    assert!(matches!(result, Err(ProtocolError::Decode(_))));
}

#[test]
fn test_garbage_text_is_a_decode_error() {
    let result = Protocol::Json.from_frame(&WireFrame::Text("{{{{".into()));
    assert!(matches!(result, Err(ProtocolError::Decode(_))));
}
