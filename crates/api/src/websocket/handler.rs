//! WebSocket handler for Axum
//!
//! Authenticates the upgrade request, loads the room's recent history and
//! hands the upgraded socket to the hub.

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
};
use collabsphere_shared::ArchivedMessage;
use serde::Deserialize;
use tokio::time::timeout;

use crate::auth::IdentityVerifier;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

use super::hub::STORE_TIMEOUT;
use super::transport::Transport;

/// Transport-level message cap. Frames above the protocol limit but under
/// this one are dropped by the pump without closing the connection.
const TRANSPORT_MESSAGE_LIMIT: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
/// Authenticates via query parameter token; the transport is never upgraded
/// for a missing or invalid token.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<WebSocketQuery>,
    ws: Option<WebSocketUpgrade>,
) -> ApiResult<Response> {
    let token = params
        .token
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let identity = state.jwt.verify_token(&token).map_err(|e| {
        tracing::warn!(error = %e, "Invalid WebSocket token received");
        ApiError::InvalidToken
    })?;

    let room_id = room_id.trim().to_string();
    if room_id.is_empty() {
        return Err(ApiError::BadRequest("Room ID is required".to_string()));
    }

    let ws = ws.ok_or_else(|| ApiError::BadRequest("WebSocket upgrade required".to_string()))?;

    let history = load_history(&state, &room_id).await;

    tracing::info!(user_id = %identity.id, room_id = %room_id, "WebSocket connection upgrade requested");

    Ok(ws
        .max_message_size(TRANSPORT_MESSAGE_LIMIT)
        .max_frame_size(TRANSPORT_MESSAGE_LIMIT)
        .on_upgrade(move |socket| async move {
            let transport = Transport::from_websocket(socket);
            let user_id = identity.id;
            match state.hub.admit(identity, &room_id, transport, history).await {
                Ok(session_id) => {
                    tracing::debug!(session_id = %session_id, user_id = %user_id, "WebSocket connection admitted");
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, room_id = %room_id, error = %e, "WebSocket admission failed");
                }
            }
        }))
}

/// Recent chat of a room, oldest first. Failures only cost the history.
async fn load_history(state: &AppState, room_id: &str) -> Vec<ArchivedMessage> {
    let limit = state.config.history_limit;
    if limit <= 0 {
        return Vec::new();
    }

    match timeout(STORE_TIMEOUT, state.store.load_recent_messages(room_id, limit)).await {
        Ok(Ok(history)) => history,
        Ok(Err(e)) => {
            tracing::warn!(room_id = %room_id, error = ?e, "Failed to load chat history");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(room_id = %room_id, "Timed out loading chat history");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use collabsphere_shared::Identity;
    use uuid::Uuid;

    use crate::routes::create_router;
    use crate::routes::test_support::{get, test_state};

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let app = create_router(test_state());

        let (status, body) = get(&app, "/ws/lobby").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, _) = get(&app, "/ws/lobby?token=").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected_before_upgrade() {
        let app = create_router(test_state());

        let (status, body) = get(&app, "/ws/lobby?token=not-a-jwt").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_blank_room_is_bad_request() {
        let state = test_state();
        let token = state
            .jwt
            .generate_token(&Identity::new(Uuid::new_v4(), "ada"))
            .unwrap();
        let app = create_router(state);

        let (status, body) = get(&app, &format!("/ws/%20%20?token={token}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Room ID is required");

        // Valid token and room, but not an upgrade request
        let (status, body) = get(&app, &format!("/ws/lobby?token={token}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "WebSocket upgrade required");
    }
}
