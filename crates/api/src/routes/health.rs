//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tokio::time::timeout;

use crate::state::AppState;
use crate::websocket::hub::STORE_TIMEOUT;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
    pub active_rooms: Option<usize>,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_status = match timeout(STORE_TIMEOUT, state.store.health()).await {
        Ok(Ok(())) => "healthy",
        Ok(Err(e)) => {
            tracing::warn!(error = ?e, "Store health check failed");
            "unhealthy"
        }
        Err(_) => "unhealthy",
    };

    let active_rooms = state.hub.active_rooms().await.ok().map(|rooms| rooms.len());

    let overall_status = if store_status == "healthy" && active_rooms.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        overall_status,
        Json(HealthResponse {
            status: if overall_status == StatusCode::OK {
                "ok".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store_status.to_string(),
            active_rooms,
        }),
    )
}

/// Liveness check (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;

    use crate::routes::create_router;
    use crate::routes::test_support::{get, test_state};

    #[tokio::test]
    async fn test_health_reports_ok() {
        let app = create_router(test_state());

        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "healthy");
        assert_eq!(body["active_rooms"], 0);

        let (status, _) = get(&app, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_fails_after_hub_shutdown() {
        let state = test_state();
        state.hub.shutdown(Duration::ZERO).await.unwrap();
        let app = create_router(state);

        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
    }
}
