//! In-process stand-in for the upstream Realtime API (§1, §9 open
//! question 1: "if the implementer wants an in-process loopback for
//! tests, it must implement the same event schema exactly"). Grounded on
//! `opusagent/mock/realtime/handlers.py`'s event-handling shape, reduced
//! to what this crate's own tests need: a session handshake and an
//! audio-buffer echo so a response carries recognizable audio back.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::realtime::ServerEvent;

/// Router exposing `GET /realtime`, mirroring the real endpoint's path
/// (minus the `model` query param, which this mock ignores).
pub fn router() -> Router {
    Router::new().route("/realtime", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(serve)
}

/// Same mock, plus a channel that receives the `type` of every client
/// event as it arrives — lets scenario tests assert on what the upstream
/// side actually saw without re-implementing a second parser.
pub fn router_with_capture(tx: mpsc::UnboundedSender<String>) -> Router {
    Router::new()
        .route("/realtime", get(upgrade_with_capture))
        .with_state(tx)
}

async fn upgrade_with_capture(
    ws: WebSocketUpgrade,
    State(tx): State<mpsc::UnboundedSender<String>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_inner(socket, Some(tx)))
}

/// Minimal session/response lifecycle: `session.update` -> `session.created`;
/// buffered audio, once committed (or a bare `response.create`), is echoed
/// back as a single `response.audio.delta` + `response.done`.
async fn serve(socket: WebSocket) {
    serve_inner(socket, None).await
}

async fn serve_inner(mut socket: WebSocket, capture: Option<mpsc::UnboundedSender<String>>) {
    let mut buffered_audio = String::new();
    let mut active_response: Option<String> = None;

    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let Ok(raw): Result<serde_json::Value, _> = serde_json::from_str(&text) else {
            continue;
        };
        let Some(event_type) = raw.get("type").and_then(|t| t.as_str()) else {
            continue;
        };

        if let Some(tx) = &capture {
            let _ = tx.send(event_type.to_string());
        }

        match event_type {
            "session.update" => {
                let created = serde_json::json!({
                    "type": "session.created",
                    "session": {"id": Uuid::new_v4().to_string()},
                });
                if socket.send(Message::Text(created.to_string().into())).await.is_err() {
                    return;
                }
            }
            "input_audio_buffer.append" => {
                if let Some(audio) = raw.get("audio").and_then(|a| a.as_str()) {
                    buffered_audio.push_str(audio);
                }
            }
            "input_audio_buffer.clear" => buffered_audio.clear(),
            "input_audio_buffer.commit" | "response.create" => {
                let response_id = format!("resp-{}", Uuid::new_v4());
                active_response = Some(response_id.clone());
                if emit_response(&mut socket, &response_id, &buffered_audio).await.is_err() {
                    return;
                }
                buffered_audio.clear();
            }
            "response.cancel" => {
                if let Some(id) = active_response.take() {
                    let cancelled = serde_json::json!({
                        "type": "response.cancelled",
                        "response_id": id,
                    });
                    let _ = socket.send(Message::Text(cancelled.to_string().into())).await;
                }
            }
            _ => {} // every other client event is accepted silently, matching §4.2's opaque pass-through
        }
    }
}

async fn emit_response(
    socket: &mut WebSocket,
    response_id: &str,
    audio_b64: &str,
) -> Result<(), axum::Error> {
    let created_event = serde_json::json!({
        "type": "response.created",
        "response": {"id": response_id, "status": "in_progress"},
    });
    socket.send(Message::Text(created_event.to_string().into())).await?;

    if !audio_b64.is_empty() {
        let delta = serde_json::json!({
            "type": "response.audio.delta",
            "response_id": response_id,
            "delta": audio_b64,
        });
        socket.send(Message::Text(delta.to_string().into())).await?;
    }

    let done = serde_json::json!({
        "type": "response.done",
        "response": {"id": response_id, "status": "completed"},
    });
    socket.send(Message::Text(done.to_string().into())).await?;
    Ok(())
}

/// Parse one of this mock's own outbound frames back into a `ServerEvent`,
/// used by tests that want typed access instead of raw JSON.
pub fn parse_server_event(text: &str) -> Result<ServerEvent, crate::error::RouterError> {
    ServerEvent::parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_its_own_session_created_frame() {
        let raw = serde_json::json!({
            "type": "session.created",
            "session": {"id": "s1"},
        })
        .to_string();
        let event = parse_server_event(&raw).unwrap();
        assert!(matches!(event, ServerEvent::SessionCreated { .. }));
    }
}
