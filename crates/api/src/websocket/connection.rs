//! WebSocket connection records
//!
//! A [`Connection`] is the hub's handle on one admitted session: who it is,
//! which room it is in, and the producer side of its bounded outbound queue.
//! The consumer side belongs to the connection's outbound pump.

use std::sync::Arc;

use collabsphere_shared::Identity;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Encoded frames waiting to be written to one connection
pub type OutboundReceiver = mpsc::Receiver<Arc<str>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Outbound queue is full")]
    Full,
    #[error("Outbound queue is closed")]
    Closed,
}

/// An admitted connection, owned by the hub
///
/// Dropping it drops the only sender of the outbound queue, which the
/// outbound pump observes as the close signal.
#[derive(Debug)]
pub struct Connection {
    /// Unique per session, never reused
    pub session_id: Uuid,

    pub identity: Identity,

    pub room_id: String,

    sender: mpsc::Sender<Arc<str>>,
}

impl Connection {
    /// Create a connection record and its outbound queue of `capacity` frames
    pub fn new(identity: Identity, room_id: impl Into<String>, capacity: usize) -> (Self, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let conn = Self {
            session_id: Uuid::new_v4(),
            identity,
            room_id: room_id.into(),
            sender,
        };
        (conn, receiver)
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.id
    }

    /// Queue a frame without waiting
    pub fn try_send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
