//! AudioCodes VoiceAI Connect JSON dialect (§6.1).
//!
//! Tagged on `type`, mirroring the `#[serde(tag = "event")]` shape
//! `twilio/media.rs` uses for the other dialect. Struct fields stay
//! snake_case and each variant carries its own `rename_all = "camelCase"`,
//! the way `twilio/media.rs::StartMetadata` does it.

use serde::{Deserialize, Serialize};

/// Inbound frames from the AudioCodes platform.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    #[serde(rename = "session.initiate", rename_all = "camelCase")]
    SessionInitiate {
        conversation_id: String,
        bot_name: String,
        caller: String,
        #[serde(default)]
        expect_audio_messages: bool,
        #[serde(default)]
        supported_media_formats: Vec<String>,
    },
    #[serde(rename = "session.resume", rename_all = "camelCase")]
    SessionResume {
        conversation_id: String,
        bot_name: String,
        caller: String,
    },
    #[serde(rename = "session.end", rename_all = "camelCase")]
    SessionEnd {
        conversation_id: String,
        #[serde(default)]
        reason_code: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "connection.validate", rename_all = "camelCase")]
    ConnectionValidate { conversation_id: String },
    #[serde(rename = "userStream.start", rename_all = "camelCase")]
    UserStreamStart { conversation_id: String },
    #[serde(rename = "userStream.stop", rename_all = "camelCase")]
    UserStreamStop { conversation_id: String },
    #[serde(rename = "userStream.chunk", rename_all = "camelCase")]
    UserStreamChunk {
        conversation_id: String,
        audio_chunk: String,
    },
    #[serde(rename = "activities", rename_all = "camelCase")]
    Activities {
        conversation_id: String,
        activities: Vec<serde_json::Value>,
    },
}

/// A single AudioCodes "activity" classified out of the raw JSON value
/// carried by an `activities` frame (§6.1; DTMF/hangup pass-through is a
/// supplemented feature, see SPEC_FULL.md §C.2). Kept separate from
/// `serde_json::Value` parsing so the router only needs to match on this.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    Dtmf { digit: String },
    Hangup,
    Custom(serde_json::Value),
}

impl Activity {
    /// Classify a raw activity value by its `type` field. Values without a
    /// recognized type (or without a `type` field at all) are `Custom` and
    /// passed through opaquely, per §1: "tool lists are opaque configuration".
    pub fn classify(value: &serde_json::Value) -> Self {
        match value.get("type").and_then(|t| t.as_str()) {
            Some("dtmf") => {
                let digit = value
                    .get("value")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Activity::Dtmf { digit }
            }
            Some("hangup") => Activity::Hangup,
            _ => Activity::Custom(value.clone()),
        }
    }
}

impl IncomingMessage {
    /// Parse a raw JSON frame, returning a `RouterError` on malformed input
    /// rather than panicking (§9: "decode-time validation: refuse malformed
    /// frames at the edge").
    pub fn parse(raw: &str) -> Result<Self, crate::error::RouterError> {
        serde_json::from_str(raw).map_err(|e| crate::error::RouterError::Parse(e.to_string()))
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            IncomingMessage::SessionInitiate { conversation_id, .. }
            | IncomingMessage::SessionResume { conversation_id, .. }
            | IncomingMessage::SessionEnd { conversation_id, .. }
            | IncomingMessage::ConnectionValidate { conversation_id }
            | IncomingMessage::UserStreamStart { conversation_id }
            | IncomingMessage::UserStreamStop { conversation_id }
            | IncomingMessage::UserStreamChunk { conversation_id, .. }
            | IncomingMessage::Activities { conversation_id, .. } => conversation_id,
        }
    }
}

/// Outbound frames to the AudioCodes platform.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "session.accepted", rename_all = "camelCase")]
    SessionAccepted {
        conversation_id: String,
        media_format: String,
    },
    #[serde(rename = "session.resumed", rename_all = "camelCase")]
    SessionResumed { conversation_id: String },
    #[serde(rename = "session.error", rename_all = "camelCase")]
    SessionError {
        conversation_id: String,
        reason: String,
    },
    #[serde(rename = "connection.validated", rename_all = "camelCase")]
    ConnectionValidated { conversation_id: String },
    #[serde(rename = "userStream.started", rename_all = "camelCase")]
    UserStreamStarted { conversation_id: String },
    #[serde(rename = "userStream.stopped", rename_all = "camelCase")]
    UserStreamStopped { conversation_id: String },
    #[serde(rename = "userStream.speech.started", rename_all = "camelCase")]
    SpeechStarted { conversation_id: String },
    #[serde(rename = "userStream.speech.stopped", rename_all = "camelCase")]
    SpeechStopped { conversation_id: String },
    #[serde(rename = "userStream.speech.hypothesis", rename_all = "camelCase")]
    SpeechHypothesis {
        conversation_id: String,
        text: String,
    },
    #[serde(rename = "userStream.speech.committed", rename_all = "camelCase")]
    SpeechCommitted { conversation_id: String },
    #[serde(rename = "playStream.start", rename_all = "camelCase")]
    PlayStreamStart {
        conversation_id: String,
        stream_id: String,
        media_format: String,
    },
    #[serde(rename = "playStream.chunk", rename_all = "camelCase")]
    PlayStreamChunk {
        conversation_id: String,
        stream_id: String,
        audio_chunk: String,
    },
    #[serde(rename = "playStream.stop", rename_all = "camelCase")]
    PlayStreamStop {
        conversation_id: String,
        stream_id: String,
    },
    #[serde(rename = "activities", rename_all = "camelCase")]
    Activities {
        conversation_id: String,
        activities: Vec<serde_json::Value>,
    },
}

impl OutgoingMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("OutgoingMessage always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_initiate() {
        let raw = r#"{"type":"session.initiate","conversationId":"c1","botName":"B","caller":"+1","expectAudioMessages":true,"supportedMediaFormats":["raw/lpcm16"]}"#;
        let msg = IncomingMessage::parse(raw).unwrap();
        assert_eq!(msg.conversation_id(), "c1");
        match msg {
            IncomingMessage::SessionInitiate {
                supported_media_formats,
                ..
            } => assert_eq!(supported_media_formats, vec!["raw/lpcm16"]),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_user_stream_chunk() {
        let raw = r#"{"type":"userStream.chunk","conversationId":"c1","audioChunk":"AAAA"}"#;
        let msg = IncomingMessage::parse(raw).unwrap();
        assert_eq!(msg.conversation_id(), "c1");
    }

    #[test]
    fn rejects_malformed_frame() {
        let raw = r#"{"type":"session.initiate"}"#;
        assert!(IncomingMessage::parse(raw).is_err());
    }

    #[test]
    fn unknown_type_is_parse_error_not_panic() {
        let raw = r#"{"type":"something.unknown","conversationId":"c1"}"#;
        assert!(IncomingMessage::parse(raw).is_err());
    }

    #[test]
    fn session_accepted_serializes_with_type_tag() {
        let msg = OutgoingMessage::SessionAccepted {
            conversation_id: "c1".into(),
            media_format: "raw/lpcm16".into(),
        };
        let json = msg.to_json();
        assert!(json.contains(r#""type":"session.accepted""#));
        assert!(json.contains(r#""mediaFormat":"raw/lpcm16""#));
    }

    #[test]
    fn parses_dtmf_activity() {
        let raw = r#"{"type":"activities","conversationId":"c1","activities":[{"type":"dtmf","value":"5"}]}"#;
        let msg = IncomingMessage::parse(raw).unwrap();
        match msg {
            IncomingMessage::Activities { activities, .. } => {
                assert_eq!(activities.len(), 1);
                match Activity::classify(&activities[0]) {
                    Activity::Dtmf { digit } => assert_eq!(digit, "5"),
                    _ => panic!("wrong activity variant"),
                }
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn classifies_hangup_and_custom_activities() {
        let hangup = serde_json::json!({"type": "hangup"});
        assert_eq!(Activity::classify(&hangup), Activity::Hangup);

        let custom = serde_json::json!({"type": "transfer", "target": "sales"});
        match Activity::classify(&custom) {
            Activity::Custom(v) => assert_eq!(v["target"], "sales"),
            _ => panic!("expected custom"),
        }
    }
}
