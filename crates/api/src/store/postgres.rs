//! Postgres-backed store

use collabsphere_shared::{ArchivedMessage, Identity, StoreError, StoreResult, WhiteboardState};
use futures::future::BoxFuture;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::ChatStore;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ChatStore for PgStore {
    fn save_chat_message<'a>(
        &'a self,
        room_id: &'a str,
        sender_id: Uuid,
        text: &'a str,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query("INSERT INTO messages (room_id, sender_id, payload) VALUES ($1, $2, $3)")
                .bind(room_id)
                .bind(sender_id)
                .bind(text)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn load_recent_messages<'a>(
        &'a self,
        room_id: &'a str,
        limit: i64,
    ) -> BoxFuture<'a, StoreResult<Vec<ArchivedMessage>>> {
        Box::pin(async move {
            let mut messages = sqlx::query_as::<_, ArchivedMessage>(
                r#"
                SELECT room_id, sender_id, payload AS text, created_at
                FROM messages
                WHERE room_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
                "#,
            )
            .bind(room_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            messages.reverse();
            Ok(messages)
        })
    }

    fn load_whiteboard<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, StoreResult<WhiteboardState>> {
        Box::pin(async move {
            let state = sqlx::query_scalar::<_, Json<WhiteboardState>>(
                "SELECT state FROM whiteboards WHERE room_id = $1",
            )
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;

            Ok(state.map(|Json(state)| state).unwrap_or_default())
        })
    }

    fn save_whiteboard<'a>(
        &'a self,
        room_id: &'a str,
        state: &'a WhiteboardState,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO whiteboards (room_id, state, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (room_id) DO UPDATE
                SET state = EXCLUDED.state, updated_at = NOW()
                "#,
            )
            .bind(room_id)
            .bind(Json(state))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn find_or_create_user<'a>(&'a self, username: &'a str) -> BoxFuture<'a, StoreResult<Identity>> {
        Box::pin(async move {
            // The no-op update makes RETURNING yield the existing row on conflict
            let identity = sqlx::query_as::<_, Identity>(
                r#"
                INSERT INTO users (id, username)
                VALUES ($1, $2)
                ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
                RETURNING id, username
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
            Ok(identity)
        })
    }

    fn find_user_by_id(&self, user_id: Uuid) -> BoxFuture<'_, StoreResult<Identity>> {
        Box::pin(async move {
            sqlx::query_as::<_, Identity>("SELECT id, username FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
        })
    }

    fn health(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collabsphere_shared::{create_pool, run_migrations, DrawEvent, DrawKind, DrawPoint};

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url, 2).await.expect("Failed to create pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        PgStore::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_user_lookup_round_trip() {
        let store = store().await;
        let name = format!("user-{}", Uuid::new_v4());

        let created = store.find_or_create_user(&name).await.unwrap();
        let again = store.find_or_create_user(&name).await.unwrap();
        assert_eq!(created, again);
        assert_eq!(store.find_user_by_id(created.id).await.unwrap(), created);
        assert!(matches!(
            store.find_user_by_id(Uuid::new_v4()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_whiteboard_and_history_persist() {
        let store = store().await;
        let room = format!("room-{}", Uuid::new_v4());

        assert!(store.load_whiteboard(&room).await.unwrap().is_empty());
        let state = WhiteboardState::new(vec![DrawEvent::new(
            DrawKind::DrawStart,
            Some(DrawPoint::at(1.0, 2.0)),
        )]);
        store.save_whiteboard(&room, &state).await.unwrap();
        assert_eq!(store.load_whiteboard(&room).await.unwrap(), state);

        let sender = Uuid::new_v4();
        store.save_chat_message(&room, sender, "first").await.unwrap();
        store.save_chat_message(&room, sender, "second").await.unwrap();
        let history = store.load_recent_messages(&room, 10).await.unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }
}
