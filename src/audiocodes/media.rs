//! AudioCodes VoiceAI Connect WebSocket endpoint (`GET /audiocodes/ws`).
//! Mirrors `twilio::media`'s multiplexing shape; the two differ only in
//! which dialect parser and `conversation_id` source they use — AudioCodes
//! carries its own `conversationId` on the first frame rather than one
//! being minted on accept.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::orchestrator::BridgeOrchestrator;
use crate::protocol::audiocodes;
use crate::session::Dialect;
use crate::twilio::media::send_all_frames;
use crate::AppState;

pub async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(mut socket: WebSocket, state: AppState) {
    tracing::info!("AudioCodes session connected");

    let first_frame = match socket.recv().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            tracing::warn!("AudioCodes socket closed before session.initiate");
            return;
        }
    };
    let first_msg = match audiocodes::IncomingMessage::parse(&first_frame) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("malformed first AudioCodes frame: {e}");
            let _ = socket.close().await;
            return;
        }
    };
    let conversation_id = first_msg.conversation_id().to_string();

    let realtime_config = state.realtime_config();
    let mut orchestrator =
        match BridgeOrchestrator::connect(Dialect::AudioCodes, conversation_id, realtime_config).await {
            Ok(o) => o,
            Err(e) => {
                tracing::error!("upstream handshake failed, aborting call: {e}");
                let _ = socket.close().await;
                return;
            }
        };

    let is_bring_up = matches!(
        first_msg,
        audiocodes::IncomingMessage::SessionInitiate { .. } | audiocodes::IncomingMessage::SessionResume { .. }
    );

    match orchestrator.handle_audiocodes(first_msg).await {
        Ok(frames) => {
            if !send_all_frames(&mut socket, frames).await {
                return;
            }
            if is_bring_up {
                let greeting = state.config.upstream.greeting_instructions.clone();
                if let Err(e) = orchestrator.send_greeting(greeting.as_deref()).await {
                    tracing::warn!("failed to send initial greeting: {e}");
                }
            }
        }
        Err(e) => {
            tracing::warn!("orchestrator error on first frame: {e}");
            if let Some(frame) = orchestrator.fatal_error_frame(&e) {
                let _ = send_all_frames(&mut socket, vec![frame]).await;
            }
            let _ = orchestrator.teardown(None).await;
            let _ = socket.close().await;
            return;
        }
    }

    loop {
        tokio::select! {
            ws_msg = socket.recv() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match audiocodes::IncomingMessage::parse(&text) {
                            Ok(msg) => {
                                match orchestrator.handle_audiocodes(msg).await {
                                    Ok(frames) => {
                                        if !send_all_frames(&mut socket, frames).await {
                                            break;
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
                            Err(e) => tracing::warn!("malformed AudioCodes frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("AudioCodes session closed");
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
                    None => break,
                }
            }
        }
    }

    let _ = orchestrator.teardown(None).await;
}
