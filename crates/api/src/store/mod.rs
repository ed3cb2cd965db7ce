//! Durable storage for chat history, whiteboard snapshots and users
//!
//! The hub and the HTTP layer only see the [`ChatStore`] trait. Two adapters
//! are provided: [`PgStore`] backed by Postgres and [`MemoryStore`] for local
//! development and tests.

mod memory;
mod postgres;

use collabsphere_shared::{ArchivedMessage, Identity, StoreResult, WhiteboardState};
use futures::future::BoxFuture;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Narrow read/write contract consumed by the hub and the boundary layer
pub trait ChatStore: Send + Sync + 'static {
    /// Persist one chat line of a room
    fn save_chat_message<'a>(
        &'a self,
        room_id: &'a str,
        sender_id: Uuid,
        text: &'a str,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Most recent chat lines of a room, oldest first
    fn load_recent_messages<'a>(
        &'a self,
        room_id: &'a str,
        limit: i64,
    ) -> BoxFuture<'a, StoreResult<Vec<ArchivedMessage>>>;

    /// Stored whiteboard of a room; empty when none was saved
    fn load_whiteboard<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, StoreResult<WhiteboardState>>;

    fn save_whiteboard<'a>(
        &'a self,
        room_id: &'a str,
        state: &'a WhiteboardState,
    ) -> BoxFuture<'a, StoreResult<()>>;

    fn find_or_create_user<'a>(&'a self, username: &'a str) -> BoxFuture<'a, StoreResult<Identity>>;

    fn find_user_by_id(&self, user_id: Uuid) -> BoxFuture<'_, StoreResult<Identity>>;

    /// Cheap connectivity check for health endpoints
    fn health(&self) -> BoxFuture<'_, StoreResult<()>>;
}
