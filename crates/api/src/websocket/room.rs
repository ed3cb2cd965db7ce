//! Room registry owned by the hub worker
//!
//! Holds every room, its members and whiteboard, and every admitted
//! connection. The registry is plain synchronous state: only the hub worker
//! touches it, so none of it is locked. Side effects that need the outside
//! world (persistence, logging of forced disconnects) are returned to the
//! worker as [`Effects`].

use std::collections::HashMap;
use std::sync::Arc;

use collabsphere_shared::{ArchivedMessage, DrawEvent, DrawKind, Identity, RoomSummary, WhiteboardState};
use uuid::Uuid;

use super::connection::Connection;
use super::events::{ClientEvent, Envelope, RoomStatePayload, ServerEvent};
use super::whiteboard::Whiteboard;

/// A decoded inbound message, stamped with the sending connection
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub room_id: String,
    pub event: ClientEvent,
}

/// Chat line to persist after it has been broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRecord {
    pub room_id: String,
    pub sender_id: Uuid,
    pub text: String,
}

/// Work left for the hub after a registry operation
#[derive(Debug, Default)]
pub struct Effects {
    /// Rooms that lost their last member, with their final whiteboard
    pub evicted: Vec<(String, WhiteboardState)>,
    pub chat: Option<ChatRecord>,
    /// Sessions forcibly removed because their queue was full or closed
    pub disconnected: Vec<Uuid>,
}

struct Room {
    /// Session ids in join order
    members: Vec<Uuid>,
    whiteboard: Whiteboard,
    dirty: bool,
}

pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    connections: HashMap<Uuid, Connection>,
    /// Live sessions of each user, across all rooms
    by_user: HashMap<Uuid, Vec<Uuid>>,
    max_whiteboard_events: usize,
}

impl RoomRegistry {
    pub fn new(max_whiteboard_events: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            connections: HashMap::new(),
            by_user: HashMap::new(),
            max_whiteboard_events,
        }
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Create an empty room seeded with a stored whiteboard. No-op if it exists.
    pub fn create_room(&mut self, room_id: &str, seed: &WhiteboardState) {
        if self.rooms.contains_key(room_id) {
            return;
        }
        self.rooms.insert(
            room_id.to_string(),
            Room {
                members: Vec::new(),
                whiteboard: Whiteboard::from_state(seed, self.max_whiteboard_events),
                dirty: false,
            },
        );
        tracing::debug!(room_id = %room_id, "Room created");
    }

    /// Add a connection to its room, creating the room if needed.
    ///
    /// The new member gets `room_state` followed by `history`; every other
    /// member gets `user_joined`.
    pub fn admit(&mut self, conn: Connection, history: &[ArchivedMessage]) -> Effects {
        let mut effects = Effects::default();
        let session_id = conn.session_id;
        let room_id = conn.room_id.clone();
        let identity = conn.identity.clone();

        if !self.rooms.contains_key(&room_id) {
            self.create_room(&room_id, &WhiteboardState::default());
        }

        self.by_user.entry(identity.id).or_default().push(session_id);
        self.connections.insert(session_id, conn);

        let (others, state) = match self.rooms.get_mut(&room_id) {
            Some(room) => {
                let others = room.members.clone();
                room.members.push(session_id);
                (others, room.whiteboard.snapshot())
            }
            None => return effects,
        };

        tracing::info!(
            session_id = %session_id,
            user_id = %identity.id,
            room_id = %room_id,
            room_size = others.len() + 1,
            "Connection admitted"
        );

        let mut failed = Vec::new();

        let users = self.identities(&room_id);
        let room_state = Envelope::new(ServerEvent::RoomState(RoomStatePayload {
            users,
            whiteboard: state,
        }))
        .in_room(room_id.clone());
        self.send_to(&[session_id], &room_state, &mut failed);

        for message in history {
            let archived = Envelope::new(ServerEvent::ArchivedTextMessage(message.text.clone()))
                .from_sender(message.sender_id)
                .in_room(room_id.clone());
            self.send_to(&[session_id], &archived, &mut failed);
        }

        let joined = Envelope::new(ServerEvent::UserJoined(identity)).in_room(room_id);
        self.send_to(&others, &joined, &mut failed);

        self.disconnect_failed(failed, &mut effects);
        effects
    }

    /// Remove a connection. Removing an absent connection is a no-op.
    pub fn remove(&mut self, session_id: Uuid) -> Effects {
        let mut effects = Effects::default();
        let mut failed = Vec::new();
        self.detach(session_id, &mut failed, &mut effects);
        self.disconnect_failed(failed, &mut effects);
        effects
    }

    /// Route one inbound message
    pub fn dispatch(&mut self, msg: InboundMessage) -> Effects {
        let mut effects = Effects::default();

        if !self.connections.contains_key(&msg.session_id) {
            tracing::debug!(
                session_id = %msg.session_id,
                event_type = %msg.event.type_name(),
                "Dropping message from unregistered connection"
            );
            return effects;
        }

        let InboundMessage {
            session_id,
            sender_id,
            room_id,
            event,
        } = msg;

        let outbound = match event {
            ClientEvent::TextMessage(text) => {
                effects.chat = Some(ChatRecord {
                    room_id: room_id.clone(),
                    sender_id,
                    text: text.clone(),
                });
                ServerEvent::TextMessage(text)
            }
            ClientEvent::DirectMessage { recipient_id, content } => {
                self.send_direct(session_id, sender_id, recipient_id, content, &mut effects);
                return effects;
            }
            ClientEvent::DrawStart(point) => {
                self.record_draw(&room_id, DrawEvent::new(DrawKind::DrawStart, Some(point.clone())));
                ServerEvent::DrawStart(point)
            }
            ClientEvent::DrawMove(point) => {
                self.record_draw(&room_id, DrawEvent::new(DrawKind::DrawMove, Some(point.clone())));
                ServerEvent::DrawMove(point)
            }
            ClientEvent::DrawEnd(point) => {
                self.record_draw(&room_id, DrawEvent::new(DrawKind::DrawEnd, point.clone()));
                ServerEvent::DrawEnd(point)
            }
            ClientEvent::ClearBoard => {
                self.record_draw(&room_id, DrawEvent::clear());
                ServerEvent::ClearBoard
            }
            ClientEvent::TypingStart => ServerEvent::TypingStart,
            ClientEvent::TypingStop => ServerEvent::TypingStop,
            ClientEvent::Unknown(kind) => {
                tracing::debug!(session_id = %session_id, event_type = %kind, "Dropping unknown event type");
                return effects;
            }
        };

        let envelope = Envelope::new(outbound)
            .from_sender(sender_id)
            .in_room(room_id.clone());
        self.broadcast_others(&room_id, session_id, &envelope, &mut effects);
        effects
    }

    /// Snapshot of every non-empty room, ordered by room id
    pub fn active_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<_> = self
            .rooms
            .iter()
            .filter(|(_, room)| !room.members.is_empty())
            .map(|(room_id, room)| RoomSummary {
                room_id: room_id.clone(),
                member_count: room.members.len(),
                members: self.identities(room_id),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    /// Whiteboards changed since the last call, marked clean
    pub fn take_dirty(&mut self) -> Vec<(String, WhiteboardState)> {
        self.rooms
            .iter_mut()
            .filter(|(_, room)| room.dirty)
            .map(|(room_id, room)| {
                room.dirty = false;
                (room_id.clone(), room.whiteboard.snapshot())
            })
            .collect()
    }

    /// Drop every connection and room, returning each room's final whiteboard
    pub fn drain_all(&mut self) -> Vec<(String, WhiteboardState)> {
        self.connections.clear();
        self.by_user.clear();
        self.rooms
            .drain()
            .map(|(room_id, room)| (room_id, room.whiteboard.snapshot()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Session ids of a room's members in join order
    #[cfg(test)]
    pub(crate) fn members(&self, room_id: &str) -> Vec<Uuid> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn whiteboard(&self, room_id: &str) -> Option<WhiteboardState> {
        self.rooms.get(room_id).map(|room| room.whiteboard.snapshot())
    }

    fn identities(&self, room_id: &str) -> Vec<Identity> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.members
                    .iter()
                    .filter_map(|session_id| self.connections.get(session_id))
                    .map(|conn| conn.identity.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record_draw(&mut self, room_id: &str, event: DrawEvent) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let dropped = room.whiteboard.apply(event);
        room.dirty = true;
        if dropped > 0 {
            tracing::warn!(
                room_id = %room_id,
                dropped,
                kept = room.whiteboard.len(),
                "Whiteboard event cap reached, dropping oldest events"
            );
        }
    }

    fn send_direct(
        &mut self,
        session_id: Uuid,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: String,
        effects: &mut Effects,
    ) {
        let targets: Vec<Uuid> = self
            .by_user
            .get(&recipient_id)
            .map(|sessions| sessions.iter().copied().filter(|s| *s != session_id).collect())
            .unwrap_or_default();

        if targets.is_empty() {
            tracing::debug!(
                sender_id = %sender_id,
                recipient_id = %recipient_id,
                "Direct message recipient not connected, dropping"
            );
            return;
        }

        let envelope = Envelope::new(ServerEvent::DirectMessage(content)).from_sender(sender_id);
        let mut failed = Vec::new();
        self.send_to(&targets, &envelope, &mut failed);
        self.disconnect_failed(failed, effects);
    }

    /// Send to every member of a room except one, from a single membership snapshot
    fn broadcast_others(&mut self, room_id: &str, except: Uuid, envelope: &Envelope, effects: &mut Effects) {
        let targets: Vec<Uuid> = match self.rooms.get(room_id) {
            Some(room) => room.members.iter().copied().filter(|s| *s != except).collect(),
            None => return,
        };

        let mut failed = Vec::new();
        self.send_to(&targets, envelope, &mut failed);
        self.disconnect_failed(failed, effects);
    }

    /// Encode once and queue on each target. Unreachable targets are collected in `failed`.
    fn send_to(&self, targets: &[Uuid], envelope: &Envelope, failed: &mut Vec<Uuid>) {
        if targets.is_empty() {
            return;
        }

        let frame: Arc<str> = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                return;
            }
        };

        for session_id in targets {
            let Some(conn) = self.connections.get(session_id) else {
                continue;
            };
            if let Err(e) = conn.try_send(Arc::clone(&frame)) {
                tracing::warn!(
                    session_id = %session_id,
                    user_id = %conn.user_id(),
                    error = %e,
                    "Outbound queue unavailable, disconnecting"
                );
                failed.push(*session_id);
            }
        }
    }

    /// Remove unreachable sessions, including any that fail while being told about the others
    fn disconnect_failed(&mut self, mut failed: Vec<Uuid>, effects: &mut Effects) {
        while let Some(session_id) = failed.pop() {
            if self.detach(session_id, &mut failed, effects) {
                effects.disconnected.push(session_id);
            }
        }
    }

    /// Take a session out of the registry. Returns false if it was not there.
    fn detach(&mut self, session_id: Uuid, failed: &mut Vec<Uuid>, effects: &mut Effects) -> bool {
        let Some(conn) = self.connections.remove(&session_id) else {
            return false;
        };

        if let Some(sessions) = self.by_user.get_mut(&conn.user_id()) {
            sessions.retain(|s| *s != session_id);
            if sessions.is_empty() {
                self.by_user.remove(&conn.user_id());
            }
        }

        let room_id = conn.room_id.clone();
        let identity = conn.identity.clone();
        // Closes the outbound queue
        drop(conn);

        let remaining = match self.rooms.get_mut(&room_id) {
            Some(room) => {
                room.members.retain(|s| *s != session_id);
                room.members.clone()
            }
            None => return true,
        };

        tracing::info!(
            session_id = %session_id,
            user_id = %identity.id,
            room_id = %room_id,
            room_size = remaining.len(),
            "Connection removed"
        );

        if remaining.is_empty() {
            if let Some(room) = self.rooms.remove(&room_id) {
                tracing::debug!(room_id = %room_id, "Evicted empty room");
                effects.evicted.push((room_id, room.whiteboard.snapshot()));
            }
        } else {
            let left = Envelope::new(ServerEvent::UserLeft(identity)).in_room(room_id);
            self.send_to(&remaining, &left, failed);
        }

        true
    }
}
