//! WebSocket Handler - 播放事件推送

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::infrastructure::events::{PlaybackEvent, PlaybackSnapshot};
use crate::infrastructure::http::state::AppState;

/// 连接建立时先发送的当前状态
#[derive(Serialize)]
#[serde(tag = "event", content = "data")]
enum Greeting {
    Snapshot(PlaybackSnapshot),
}

/// 播放事件 WebSocket 连接处理
pub async fn playback_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_playback_socket(socket, state))
}

fn to_message<T: Serialize>(value: &T) -> Option<Message> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize event");
            None
        }
    }
}

async fn handle_playback_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // 先订阅再读快照，避免漏掉中间的事件
    let mut event_rx = state.event_publisher.subscribe();
    let greeting = Greeting::Snapshot(state.event_publisher.current());

    tracing::info!("Playback WebSocket connected");

    // 事件转发任务
    let mut forward_task = tokio::spawn(async move {
        if let Some(msg) = to_message(&greeting) {
            if sender.send(msg).await.is_err() {
                return;
            }
        }

        loop {
            let event: PlaybackEvent = match event_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Playback WebSocket lagged, events skipped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let Some(msg) = to_message(&event) else {
                continue;
            };
            if let Err(e) = sender.send(msg).await {
                tracing::debug!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    // 接收客户端消息（心跳）
    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    tracing::info!("Playback WebSocket closed by client");
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Playback WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    // 任一任务结束后停止另一个
    tokio::select! {
        _ = &mut forward_task => receive_task.abort(),
        _ = &mut receive_task => forward_task.abort(),
    }

    tracing::info!("Playback WebSocket disconnected");
}
