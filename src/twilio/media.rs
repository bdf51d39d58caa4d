//! Twilio Media Streams WebSocket endpoint (`GET /twilio/media`). Same
//! `tokio::select!` multiplexing shape the teacher used here, generalized
//! to drive a `BridgeOrchestrator` instead of an inline STT/Claude/TTS
//! pipeline.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::orchestrator::{BridgeOrchestrator, PlatformFrame};
use crate::protocol::twilio;
use crate::session::Dialect;
use crate::AppState;

pub async fn handle_media_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(socket, state))
}

async fn handle_media_stream(mut socket: WebSocket, state: AppState) {
    tracing::info!("Twilio media stream connected");

    let conversation_id = uuid::Uuid::new_v4().to_string();
    let realtime_config = state.realtime_config();
    let mut orchestrator =
        match BridgeOrchestrator::connect(Dialect::Twilio, conversation_id, realtime_config).await {
            Ok(o) => o,
            Err(e) => {
                tracing::error!("upstream handshake failed, aborting call: {e}");
                let _ = socket.close().await;
                return;
            }
        };

    loop {
        tokio::select! {
            ws_msg = socket.recv() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match twilio::IncomingMessage::parse(&text) {
                            Ok(msg) => {
                                let is_start = matches!(msg, twilio::IncomingMessage::Start { .. });
                                match orchestrator.handle_twilio(msg).await {
                                    Ok(frames) => {
                                        if !send_all_frames(&mut socket, frames).await {
                                            break;
                                        }
                                        if is_start {
                                            let greeting = state.config.upstream.greeting_instructions.clone();
                                            if let Err(e) = orchestrator.send_greeting(greeting.as_deref()).await {
                                                tracing::warn!("failed to send initial greeting: {e}");
                                            }
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("orchestrator error: {e}");
                                        if let Some(frame) = orchestrator.fatal_error_frame(&e) {
                                            let _ = send_all_frames(&mut socket, vec![frame]).await;
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(e) => tracing::warn!("malformed Twilio frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Twilio media stream closed");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {e}");
                        break;
                    }
                    _ => continue,
                }
            }

            notification = orchestrator.poll_upstream() => {
                match notification {
                    Some(frames) => {
                        if !send_all_frames(&mut socket, frames).await {
                            break;
                        }
                    }
                    None => break, // upstream client shut down
                }
            }
        }
    }

    let _ = orchestrator.teardown(None).await;
}

pub(crate) async fn send_all_frames(socket: &mut WebSocket, frames: Vec<PlatformFrame>) -> bool {
    for frame in frames {
        if socket.send(Message::Text(frame.to_json().into())).await.is_err() {
            tracing::error!("failed to send frame to Twilio");
            return false;
        }
    }
    true
}
