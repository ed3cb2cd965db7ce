//! Active room listing

use axum::{extract::State, Json};
use collabsphere_shared::RoomSummary;

use crate::error::ApiResult;
use crate::state::AppState;

/// Every non-empty room with its members
pub async fn list_rooms(State(state): State<AppState>) -> ApiResult<Json<Vec<RoomSummary>>> {
    let rooms = state.hub.active_rooms().await?;
    Ok(Json(rooms))
}
