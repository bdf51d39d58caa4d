//! Frame builders simulating the telephony side of a call (§1, §8 seed
//! scenarios), grounded on the wire shapes
//! `opusagent/local/mock_twilio_client.py` drives against a real bridge.
//! These build the exact JSON strings a platform would send; tests feed
//! them straight into `BridgeOrchestrator::handle_audiocodes`/
//! `handle_twilio` without opening a socket.

use base64::Engine;
use serde_json::json;

/// AudioCodes `session.initiate` (§8 scenario S1).
pub fn audiocodes_session_initiate(conversation_id: &str, supported_media_formats: &[&str]) -> String {
    json!({
        "type": "session.initiate",
        "conversationId": conversation_id,
        "botName": "mock-bot",
        "caller": "+15555550100",
        "expectAudioMessages": true,
        "supportedMediaFormats": supported_media_formats,
    })
    .to_string()
}

pub fn audiocodes_session_end(conversation_id: &str, reason: &str) -> String {
    json!({
        "type": "session.end",
        "conversationId": conversation_id,
        "reasonCode": "normal",
        "reason": reason,
    })
    .to_string()
}

/// A `userStream.chunk` frame carrying `byte_len` bytes of PCM16 silence.
pub fn audiocodes_user_stream_chunk(conversation_id: &str, byte_len: usize) -> String {
    let silence = vec![0u8; byte_len];
    json!({
        "type": "userStream.chunk",
        "conversationId": conversation_id,
        "audioChunk": base64::engine::general_purpose::STANDARD.encode(silence),
    })
    .to_string()
}

pub fn audiocodes_dtmf_activity(conversation_id: &str, digit: &str) -> String {
    json!({
        "type": "activities",
        "conversationId": conversation_id,
        "activities": [{"type": "dtmf", "value": digit}],
    })
    .to_string()
}

/// Twilio `start` frame (§8 scenario S2).
pub fn twilio_start(stream_sid: &str, call_sid: &str) -> String {
    json!({
        "event": "start",
        "streamSid": stream_sid,
        "start": {
            "accountSid": "AC0000000000000000000000000000000",
            "callSid": call_sid,
            "tracks": ["inbound"],
            "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
        },
    })
    .to_string()
}

/// A `media` frame carrying exactly 160 bytes of µ-law silence.
pub fn twilio_media_silence(stream_sid: &str) -> String {
    let mulaw_silence = vec![crate::audio::MULAW_SILENCE; crate::audio::TWILIO_FRAME_BYTES];
    json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": {
            "track": "inbound",
            "payload": base64::engine::general_purpose::STANDARD.encode(mulaw_silence),
        },
    })
    .to_string()
}

pub fn twilio_stop(stream_sid: &str) -> String {
    json!({"event": "stop", "streamSid": stream_sid}).to_string()
}
