//! Common types used across collabsphere

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Identity
// =============================================================================

/// A verified user identity. Issued by the identity verifier and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct Identity {
    pub id: Uuid,
    /// Display name shown to other room members
    pub username: String,
}

impl Identity {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

// =============================================================================
// Whiteboard
// =============================================================================

/// Kind of a whiteboard event. `ClearBoard` is the clear marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawKind {
    DrawStart,
    DrawMove,
    DrawEnd,
    ClearBoard,
}

/// Coordinates and stroke style carried by a draw event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(
        rename = "lineWidth",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub line_width: Option<f64>,
}

impl DrawPoint {
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            color: None,
            line_width: None,
        }
    }
}

/// A single entry of a room's whiteboard log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawEvent {
    #[serde(rename = "type")]
    pub kind: DrawKind,
    #[serde(default)]
    pub payload: Option<DrawPoint>,
}

impl DrawEvent {
    pub fn new(kind: DrawKind, payload: Option<DrawPoint>) -> Self {
        Self { kind, payload }
    }

    pub fn clear() -> Self {
        Self {
            kind: DrawKind::ClearBoard,
            payload: None,
        }
    }

    pub fn is_clear(&self) -> bool {
        self.kind == DrawKind::ClearBoard
    }
}

/// Ordered whiteboard event log, as persisted and as sent to joining members
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhiteboardState {
    #[serde(default)]
    pub events: Vec<DrawEvent>,
}

impl WhiteboardState {
    pub fn new(events: Vec<DrawEvent>) -> Self {
        Self { events }
    }

    /// The current drawing: every event after the last clear marker, in order.
    pub fn replay(&self) -> WhiteboardState {
        let start = self
            .events
            .iter()
            .rposition(DrawEvent::is_clear)
            .map(|idx| idx + 1)
            .unwrap_or(0);

        WhiteboardState {
            events: self.events[start..].to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// =============================================================================
// Rooms and history
// =============================================================================

/// Snapshot of an active room, returned by the active rooms query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub member_count: usize,
    pub members: Vec<Identity>,
}

/// A persisted chat message, replayed to members joining a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ArchivedMessage {
    pub room_id: String,
    pub sender_id: Uuid,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_keeps_events_after_last_clear() {
        let state = WhiteboardState::new(vec![
            DrawEvent::new(DrawKind::DrawStart, Some(DrawPoint::at(0.0, 0.0))),
            DrawEvent::clear(),
            DrawEvent::new(DrawKind::DrawStart, Some(DrawPoint::at(1.0, 1.0))),
            DrawEvent::new(DrawKind::DrawEnd, Some(DrawPoint::at(2.0, 2.0))),
        ]);

        let replay = state.replay();
        assert_eq!(replay.events.len(), 2);
        assert_eq!(replay.events[0].payload, Some(DrawPoint::at(1.0, 1.0)));
        assert_eq!(replay.events[1].kind, DrawKind::DrawEnd);
    }

    #[test]
    fn test_replay_after_trailing_clear_is_empty() {
        let state = WhiteboardState::new(vec![
            DrawEvent::new(DrawKind::DrawStart, Some(DrawPoint::at(5.0, 5.0))),
            DrawEvent::new(DrawKind::DrawMove, Some(DrawPoint::at(6.0, 6.0))),
            DrawEvent::clear(),
        ]);

        assert!(state.replay().is_empty());
    }

    #[test]
    fn test_draw_event_wire_shape() {
        let event = DrawEvent::new(
            DrawKind::DrawMove,
            Some(DrawPoint {
                x: 3.0,
                y: 4.5,
                color: Some("#ff0000".to_string()),
                line_width: Some(2.0),
            }),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "draw_move");
        assert_eq!(json["payload"]["lineWidth"], 2.0);
        assert_eq!(json["payload"]["color"], "#ff0000");

        let end: DrawEvent = serde_json::from_str(r#"{"type":"draw_end","payload":null}"#).unwrap();
        assert_eq!(end.kind, DrawKind::DrawEnd);
        assert!(end.payload.is_none());
    }
}
