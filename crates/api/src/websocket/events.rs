//! WebSocket event types and serialization
//!
//! Client frames are decoded in two steps: the `{type, payload}` envelope
//! first, then the payload according to the type. A frame that is not an
//! envelope at all is legacy plain text; an envelope whose payload does not
//! fit its type is dropped.

use std::sync::Arc;

use collabsphere_shared::{DrawPoint, Identity, WhiteboardState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Largest inbound frame accepted, in bytes
pub const MAX_MESSAGE_SIZE: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("Frame is not a message envelope")]
    NotAnEnvelope,
    #[error("Malformed {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Reject frames over [`MAX_MESSAGE_SIZE`]
pub fn check_frame_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size,
            limit: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Raw inbound envelope. `sender` and `room_id` sent by clients are ignored.
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct DirectPayload {
    recipient_id: Uuid,
    content: String,
}

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    TextMessage(String),
    DirectMessage { recipient_id: Uuid, content: String },
    DrawStart(DrawPoint),
    DrawMove(DrawPoint),
    DrawEnd(Option<DrawPoint>),
    ClearBoard,
    TypingStart,
    TypingStop,
    /// A type this server does not know; dispatched as a no-op
    Unknown(String),
}

impl ClientEvent {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: InboundEnvelope =
            serde_json::from_str(text).map_err(|_| ProtocolError::NotAnEnvelope)?;

        let payload = envelope.payload;
        let kind = envelope.kind;
        let parse_err = |source| ProtocolError::Payload {
            kind: kind.clone(),
            source,
        };

        let event = match kind.as_str() {
            "text_message" => ClientEvent::TextMessage(serde_json::from_value(payload).map_err(parse_err)?),
            "direct_message" => {
                let dm: DirectPayload = serde_json::from_value(payload).map_err(parse_err)?;
                ClientEvent::DirectMessage {
                    recipient_id: dm.recipient_id,
                    content: dm.content,
                }
            }
            "draw_start" => ClientEvent::DrawStart(serde_json::from_value(payload).map_err(parse_err)?),
            "draw_move" => ClientEvent::DrawMove(serde_json::from_value(payload).map_err(parse_err)?),
            "draw_end" => ClientEvent::DrawEnd(serde_json::from_value(payload).map_err(parse_err)?),
            "clear_board" => ClientEvent::ClearBoard,
            "typing_start" => ClientEvent::TypingStart,
            "typing_stop" => ClientEvent::TypingStop,
            _ => ClientEvent::Unknown(kind.clone()),
        };

        Ok(event)
    }

    /// Decode a frame, treating anything that is not an envelope as chat text
    pub fn decode_or_plain_text(text: &str) -> Result<Self, ProtocolError> {
        match Self::decode(text) {
            Err(ProtocolError::NotAnEnvelope) => Ok(ClientEvent::TextMessage(text.to_string())),
            other => other,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            ClientEvent::TextMessage(_) => "text_message",
            ClientEvent::DirectMessage { .. } => "direct_message",
            ClientEvent::DrawStart(_) => "draw_start",
            ClientEvent::DrawMove(_) => "draw_move",
            ClientEvent::DrawEnd(_) => "draw_end",
            ClientEvent::ClearBoard => "clear_board",
            ClientEvent::TypingStart => "typing_start",
            ClientEvent::TypingStop => "typing_stop",
            ClientEvent::Unknown(kind) => kind,
        }
    }
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    TextMessage(String),
    /// Persisted chat line replayed to a joining member
    ArchivedTextMessage(String),
    DirectMessage(String),
    DrawStart(DrawPoint),
    DrawMove(DrawPoint),
    DrawEnd(Option<DrawPoint>),
    ClearBoard,
    TypingStart,
    TypingStop,
    UserJoined(Identity),
    UserLeft(Identity),
    /// Sent only to the admitted connection
    RoomState(RoomStatePayload),
}

/// Members and replayed whiteboard of a room
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStatePayload {
    pub users: Vec<Identity>,
    pub whiteboard: WhiteboardState,
}

/// Outbound envelope: the event plus the routing fields stamped by the hub
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: ServerEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl Envelope {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            event,
            sender: None,
            room_id: None,
        }
    }

    pub fn from_sender(mut self, sender: Uuid) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    /// Serialize once; the result is shared by every recipient's queue
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collabsphere_shared::{DrawEvent, DrawKind};

    #[test]
    fn test_decode_text_message() {
        let event = ClientEvent::decode(r#"{"type":"text_message","payload":"hello"}"#).unwrap();
        assert_eq!(event, ClientEvent::TextMessage("hello".to_string()));
    }

    #[test]
    fn test_decode_ignores_client_routing_fields() {
        let json = r#"{"type":"typing_start","payload":null,"sender":"mallory","room_id":"other"}"#;
        assert_eq!(ClientEvent::decode(json).unwrap(), ClientEvent::TypingStart);
    }

    #[test]
    fn test_decode_direct_message() {
        let recipient = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"direct_message","payload":{{"recipient_id":"{recipient}","content":"psst"}}}}"#
        );
        match ClientEvent::decode(&json).unwrap() {
            ClientEvent::DirectMessage { recipient_id, content } => {
                assert_eq!(recipient_id, recipient);
                assert_eq!(content, "psst");
            }
            other => panic!("Expected DirectMessage, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_draw_events() {
        let start =
            ClientEvent::decode(r##"{"type":"draw_start","payload":{"x":1,"y":2,"color":"#000","lineWidth":3}}"##)
                .unwrap();
        match start {
            ClientEvent::DrawStart(point) => {
                assert_eq!((point.x, point.y), (1.0, 2.0));
                assert_eq!(point.color.as_deref(), Some("#000"));
                assert_eq!(point.line_width, Some(3.0));
            }
            other => panic!("Expected DrawStart, got {other:?}"),
        }

        let end = ClientEvent::decode(r#"{"type":"draw_end","payload":null}"#).unwrap();
        assert_eq!(end, ClientEvent::DrawEnd(None));
        let end = ClientEvent::decode(r#"{"type":"draw_end"}"#).unwrap();
        assert_eq!(end, ClientEvent::DrawEnd(None));
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let err = ClientEvent::decode(r#"{"type":"draw_move","payload":{"x":"left"}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Payload { ref kind, .. } if kind == "draw_move"));

        let err = ClientEvent::decode_or_plain_text(r#"{"type":"direct_message","payload":"bob"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Payload { .. }));
    }

    #[test]
    fn test_non_envelope_falls_back_to_plain_text() {
        for raw in ["hola a todos", "{not json", "42", r#""quoted""#] {
            let event = ClientEvent::decode_or_plain_text(raw).unwrap();
            assert_eq!(event, ClientEvent::TextMessage(raw.to_string()));
        }
    }

    #[test]
    fn test_unknown_type_decodes_to_unknown() {
        let event = ClientEvent::decode(r#"{"type":"reaction","payload":{"emoji":"+1"}}"#).unwrap();
        assert_eq!(event, ClientEvent::Unknown("reaction".to_string()));
        assert_eq!(event.type_name(), "reaction");
    }

    #[test]
    fn test_frame_size_limit() {
        assert!(check_frame_size(MAX_MESSAGE_SIZE).is_ok());
        assert!(matches!(
            check_frame_size(MAX_MESSAGE_SIZE + 1),
            Err(ProtocolError::FrameTooLarge { size: 513, limit: 512 })
        ));
    }

    #[test]
    fn test_envelope_wire_shape() {
        let sender = Uuid::new_v4();
        let encoded = Envelope::new(ServerEvent::TextMessage("hi".to_string()))
            .from_sender(sender)
            .in_room("alpha")
            .encode()
            .unwrap();
        let json: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(json["type"], "text_message");
        assert_eq!(json["payload"], "hi");
        assert_eq!(json["sender"], sender.to_string());
        assert_eq!(json["room_id"], "alpha");

        let encoded = Envelope::new(ServerEvent::ClearBoard).encode().unwrap();
        let json: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(json["type"], "clear_board");
        assert!(json.get("sender").is_none());
    }

    #[test]
    fn test_room_state_wire_shape() {
        let user = Identity::new(Uuid::new_v4(), "ada");
        let event = ServerEvent::RoomState(RoomStatePayload {
            users: vec![user.clone()],
            whiteboard: WhiteboardState::new(vec![DrawEvent::new(
                DrawKind::DrawStart,
                Some(DrawPoint::at(1.0, 1.0)),
            )]),
        });
        let json: Value = serde_json::from_str(&Envelope::new(event).encode().unwrap()).unwrap();
        assert_eq!(json["type"], "room_state");
        assert_eq!(json["payload"]["users"][0]["username"], "ada");
        assert_eq!(json["payload"]["whiteboard"]["events"][0]["type"], "draw_start");
        assert_eq!(json["payload"]["whiteboard"]["events"][0]["payload"]["x"], 1.0);
    }
}
