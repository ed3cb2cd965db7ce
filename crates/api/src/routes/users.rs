//! User lookup routes

use axum::{
    extract::{Path, State},
    Json,
};
use collabsphere_shared::Identity;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Get a user's public profile. An id that does not parse names no user.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Identity>> {
    let user_id = Uuid::parse_str(&user_id).map_err(|_| ApiError::NotFound)?;
    let identity = state.store.find_user_by_id(user_id).await?;
    Ok(Json(identity))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use uuid::Uuid;

    use crate::routes::create_router;
    use crate::routes::test_support::{get, test_state};

    #[tokio::test]
    async fn test_get_user() {
        let state = test_state();
        let identity = state.store.find_or_create_user("grace").await.unwrap();
        let app = create_router(state);

        let (status, body) = get(&app, &format!("/api/users/{}", identity.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "grace");
        assert_eq!(body["id"], identity.id.to_string());
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let app = create_router(test_state());

        let (status, body) = get(&app, &format!("/api/users/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_malformed_user_id_is_not_found() {
        let app = create_router(test_state());

        let (status, body) = get(&app, "/api/users/not-a-uuid").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}
