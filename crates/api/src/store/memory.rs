//! In-memory store for development and tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use collabsphere_shared::{ArchivedMessage, Identity, StoreError, StoreResult, WhiteboardState};
use futures::future::BoxFuture;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ChatStore;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, Identity>,
    usernames: HashMap<String, Uuid>,
    messages: HashMap<String, Vec<ArchivedMessage>>,
    whiteboards: HashMap<String, WhiteboardState>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    whiteboard_saves: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a database error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful whiteboard saves so far
    pub fn whiteboard_save_count(&self) -> usize {
        self.whiteboard_saves.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl ChatStore for MemoryStore {
    fn save_chat_message<'a>(
        &'a self,
        room_id: &'a str,
        sender_id: Uuid,
        text: &'a str,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.check_writable()?;
            let mut tables = self.tables.write().await;
            tables
                .messages
                .entry(room_id.to_string())
                .or_default()
                .push(ArchivedMessage {
                    room_id: room_id.to_string(),
                    sender_id,
                    text: text.to_string(),
                    created_at: OffsetDateTime::now_utc(),
                });
            Ok(())
        })
    }

    fn load_recent_messages<'a>(
        &'a self,
        room_id: &'a str,
        limit: i64,
    ) -> BoxFuture<'a, StoreResult<Vec<ArchivedMessage>>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            let all = tables.messages.get(room_id).map(Vec::as_slice).unwrap_or_default();
            let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
            let start = all.len().saturating_sub(limit);
            Ok(all[start..].to_vec())
        })
    }

    fn load_whiteboard<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, StoreResult<WhiteboardState>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(tables.whiteboards.get(room_id).cloned().unwrap_or_default())
        })
    }

    fn save_whiteboard<'a>(
        &'a self,
        room_id: &'a str,
        state: &'a WhiteboardState,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.check_writable()?;
            let mut tables = self.tables.write().await;
            tables.whiteboards.insert(room_id.to_string(), state.clone());
            self.whiteboard_saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn find_or_create_user<'a>(&'a self, username: &'a str) -> BoxFuture<'a, StoreResult<Identity>> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            if let Some(id) = tables.usernames.get(username).copied() {
                if let Some(identity) = tables.users.get(&id) {
                    return Ok(identity.clone());
                }
            }

            self.check_writable()?;
            let identity = Identity::new(Uuid::new_v4(), username);
            tables.usernames.insert(username.to_string(), identity.id);
            tables.users.insert(identity.id, identity.clone());
            Ok(identity)
        })
    }

    fn find_user_by_id(&self, user_id: Uuid) -> BoxFuture<'_, StoreResult<Identity>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            tables
                .users
                .get(&user_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
        })
    }

    fn health(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
