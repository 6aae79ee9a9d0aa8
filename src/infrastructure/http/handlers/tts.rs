//! TTS Handlers - 朗读、事件推送与流控制

use axum::{extract::State, Json};
use serde::Deserialize;
use std::sync::Arc;

use crate::application::{
    BindMessageCommand, BindMessageResponse, CancelMessageCommand, CancelMessageResponse,
    PushEventsCommand, PushEventsResponse, SpeakCommand, SpeakResponse, StopPlaybackCommand,
    StopPlaybackResponse,
};
use crate::infrastructure::adapters::TransportEvent;
use crate::infrastructure::http::dto::ApiResponse;
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

// ============================================================================
// Speak
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub message_id: String,
    pub text: String,
    #[serde(default)]
    pub scope: Option<String>,
}

pub async fn speak(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpeakRequest>,
) -> Result<Json<ApiResponse<SpeakResponse>>, ApiError> {
    let cmd = SpeakCommand {
        message_id: req.message_id,
        text: req.text,
        scope: req.scope,
    };

    let result = state.speak_handler.handle(cmd).await?;
    Ok(Json(ApiResponse::success(result)))
}

// ============================================================================
// Push Events
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PushEventsRequest {
    pub events: Vec<TransportEvent>,
}

pub async fn push_events(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PushEventsRequest>,
) -> Result<Json<ApiResponse<PushEventsResponse>>, ApiError> {
    let result = state
        .push_events_handler
        .handle(PushEventsCommand { events: req.events })
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

// ============================================================================
// Bind
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub transport_id: String,
    pub message_id: String,
}

pub async fn bind_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BindRequest>,
) -> Result<Json<ApiResponse<BindMessageResponse>>, ApiError> {
    let cmd = BindMessageCommand {
        transport_id: req.transport_id,
        message_id: req.message_id,
    };

    let result = state.bind_message_handler.handle(cmd).await?;
    Ok(Json(ApiResponse::success(result)))
}

// ============================================================================
// Stop
// ============================================================================

pub async fn stop_playback(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<StopPlaybackResponse>>, ApiError> {
    let result = state.stop_playback_handler.handle(StopPlaybackCommand).await?;
    Ok(Json(ApiResponse::success(result)))
}

// ============================================================================
// Cancel
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub message_id: String,
}

pub async fn cancel_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ApiResponse<CancelMessageResponse>>, ApiError> {
    let cmd = CancelMessageCommand {
        message_id: req.message_id,
    };

    let result = state.cancel_message_handler.handle(cmd).await?;
    Ok(Json(ApiResponse::success(result)))
}
