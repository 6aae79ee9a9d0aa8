//! Playback Handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::application::GetPlaybackStateQuery;
use crate::infrastructure::events::PlaybackSnapshot;
use crate::infrastructure::http::dto::ApiResponse;
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

pub async fn get_playback_state(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<PlaybackSnapshot>>, ApiError> {
    let snapshot = state
        .get_playback_state_handler
        .handle(GetPlaybackStateQuery)
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}
