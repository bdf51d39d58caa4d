//! Upstream OpenAI-style Realtime API event taxonomy (§6.3).
//!
//! Grounded on `examples/original_source/opusagent/realtime/realtime_client.py`'s
//! imports (which enumerate every client/server event family) and
//! `opusagent/models/__init__.py`. Ids are plain `String`s/`uuid::Uuid`, the
//! original treats them the same way.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session configuration sent in `session.update` (§4.4.2). Voice, model,
/// instructions, and tool schemas are opaque per §1 — passed through as-is.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub modalities: Vec<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub input_audio_format: Option<String>,
    #[serde(default)]
    pub output_audio_format: Option<String>,
    #[serde(default)]
    pub turn_detection: Option<Value>,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// An opaque conversation item (§3 "Conversation item"). The bridge treats
/// these as pass-through records keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<Value>,
}

/// Client → server events (§6.3).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "conversation.item.retrieve")]
    ConversationItemRetrieve { item_id: String },
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u32,
    },
    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete { item_id: String },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
    #[serde(rename = "transcription_session.update")]
    TranscriptionSessionUpdate { session: Value },
}

impl ClientEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ClientEvent always serializes")
    }

    /// Byte cost of this event for the rate limiter (§4.4.5): audio append
    /// events count their payload size, everything else counts zero bytes
    /// (but still one request).
    pub fn byte_cost(&self) -> usize {
        match self {
            ClientEvent::InputAudioBufferAppend { audio } => audio.len(),
            _ => 0,
        }
    }
}

/// Server → client events (§6.3). Unknown/future event types are a parse
/// error at this layer (§9 "decode-time validation: refuse malformed
/// frames at the edge") — callers that want best-effort forwarding should
/// match on the raw JSON before calling `parse`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: Value },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: Value },
    #[serde(rename = "conversation.created")]
    ConversationCreated { conversation: Value },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: ConversationItem },
    #[serde(rename = "conversation.item.retrieved")]
    ConversationItemRetrieved { item: ConversationItem },
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated { item_id: String },
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted { item_id: String },
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputAudioTranscriptionDelta { item_id: String, delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted { item_id: String, transcript: String },
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputAudioTranscriptionFailed { item_id: String, error: Value },
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted { item_id: String },
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared,
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted { item_id: String, audio_start_ms: u64 },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped { item_id: String, audio_end_ms: u64 },
    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseObject },
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseObject },
    #[serde(rename = "response.cancelled")]
    ResponseCancelled { response_id: String },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        response_id: String,
        item: ConversationItem,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        response_id: String,
        item: ConversationItem,
    },
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded { response_id: String, part: Value },
    #[serde(rename = "response.content_part.done")]
    ContentPartDone { response_id: String, part: Value },
    #[serde(rename = "response.text.delta")]
    TextDelta { response_id: String, delta: String },
    #[serde(rename = "response.text.done")]
    TextDone { response_id: String, text: String },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { response_id: String, delta: String },
    #[serde(rename = "response.audio.done")]
    AudioDone { response_id: String },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { response_id: String, delta: String },
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone { response_id: String, transcript: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { response_id: String, delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        response_id: String,
        arguments: String,
    },
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated { rate_limits: Vec<Value> },
    #[serde(rename = "error")]
    Error { error: RealtimeErrorDetail },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Error codes the upstream API sends that mean the session itself is
/// unusable, not just the turn that triggered them — §7 `RemoteError`'s
/// "severity=fatal" has no wire representation (OpenAI's `error` event
/// carries no severity field), so this is the concrete rule this bridge
/// applies in its place.
const FATAL_ERROR_CODES: &[&str] = &["session_expired", "invalid_api_key", "internal_server_error"];

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    /// Not part of the upstream wire format; always `false` as parsed.
    /// Callers should use [`RealtimeErrorDetail::is_fatal`] instead of
    /// reading this field directly.
    #[serde(default)]
    pub fatal: bool,
}

impl RealtimeErrorDetail {
    /// Whether this error should end the call (§7 `RemoteError`,
    /// "severity=fatal"). True if the wire event somehow carried an
    /// explicit `fatal` flag, or if `code` is one of [`FATAL_ERROR_CODES`].
    pub fn is_fatal(&self) -> bool {
        self.fatal
            || self
                .code
                .as_deref()
                .is_some_and(|c| FATAL_ERROR_CODES.contains(&c))
    }
}

/// Event types the router treats as log-only: surfaced via structured logs
/// in addition to normal dispatch, never blocking call teardown (§4.2).
pub fn is_log_only(event_type: &str) -> bool {
    matches!(
        event_type,
        "error" | "rate_limits.updated" | "response.done" | "response.cancelled"
    )
}

impl ServerEvent {
    pub fn parse(raw: &str) -> Result<Self, crate::error::RouterError> {
        serde_json::from_str(raw).map_err(|e| crate::error::RouterError::Parse(e.to_string()))
    }

    /// The `type` discriminator, recovered for logging even when the
    /// variant itself doesn't carry the string.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::ConversationCreated { .. } => "conversation.created",
            ServerEvent::ConversationItemCreated { .. } => "conversation.item.created",
            ServerEvent::ConversationItemRetrieved { .. } => "conversation.item.retrieved",
            ServerEvent::ConversationItemTruncated { .. } => "conversation.item.truncated",
            ServerEvent::ConversationItemDeleted { .. } => "conversation.item.deleted",
            ServerEvent::InputAudioTranscriptionDelta { .. } => {
                "conversation.item.input_audio_transcription.delta"
            }
            ServerEvent::InputAudioTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::InputAudioTranscriptionFailed { .. } => {
                "conversation.item.input_audio_transcription.failed"
            }
            ServerEvent::InputAudioBufferCommitted { .. } => "input_audio_buffer.committed",
            ServerEvent::InputAudioBufferCleared => "input_audio_buffer.cleared",
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::ResponseCancelled { .. } => "response.cancelled",
            ServerEvent::OutputItemAdded { .. } => "response.output_item.added",
            ServerEvent::OutputItemDone { .. } => "response.output_item.done",
            ServerEvent::ContentPartAdded { .. } => "response.content_part.added",
            ServerEvent::ContentPartDone { .. } => "response.content_part.done",
            ServerEvent::TextDelta { .. } => "response.text.delta",
            ServerEvent::TextDone { .. } => "response.text.done",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::AudioDone { .. } => "response.audio.done",
            ServerEvent::AudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::AudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::FunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            ServerEvent::FunctionCallArgumentsDone { .. } => {
                "response.function_call_arguments.done"
            }
            ServerEvent::RateLimitsUpdated { .. } => "rate_limits.updated",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_serializes_tag() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig {
                modalities: vec!["audio".into(), "text".into()],
                voice: Some("alloy".into()),
                ..Default::default()
            },
        };
        let json = event.to_json();
        assert!(json.contains(r#""type":"session.update""#));
        assert!(json.contains(r#""voice":"alloy""#));
    }

    #[test]
    fn audio_append_byte_cost_counts_payload() {
        let event = ClientEvent::InputAudioBufferAppend {
            audio: "AAAA".into(),
        };
        assert_eq!(event.byte_cost(), 4);
    }

    #[test]
    fn control_event_byte_cost_is_zero() {
        let event = ClientEvent::InputAudioBufferCommit;
        assert_eq!(event.byte_cost(), 0);
    }

    #[test]
    fn parses_audio_delta() {
        let raw = r#"{"type":"response.audio.delta","response_id":"r1","delta":"AAAA"}"#;
        let event = ServerEvent::parse(raw).unwrap();
        assert_eq!(event.type_name(), "response.audio.delta");
        match event {
            ServerEvent::AudioDelta { response_id, delta } => {
                assert_eq!(response_id, "r1");
                assert_eq!(delta, "AAAA");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_error_event() {
        let raw = r#"{"type":"error","error":{"code":"invalid_request","message":"bad"}}"#;
        let event = ServerEvent::parse(raw).unwrap();
        assert!(is_log_only(event.type_name()));
    }

    #[test]
    fn ordinary_error_codes_are_not_fatal() {
        let raw = r#"{"type":"error","error":{"code":"invalid_request","message":"bad"}}"#;
        match ServerEvent::parse(raw).unwrap() {
            ServerEvent::Error { error } => assert!(!error.is_fatal()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn session_expired_error_code_is_fatal() {
        let raw = r#"{"type":"error","error":{"code":"session_expired","message":"bye"}}"#;
        match ServerEvent::parse(raw).unwrap() {
            ServerEvent::Error { error } => assert!(error.is_fatal()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn missing_error_code_defaults_to_non_fatal() {
        let raw = r#"{"type":"error","error":{"message":"no code given"}}"#;
        match ServerEvent::parse(raw).unwrap() {
            ServerEvent::Error { error } => assert!(!error.is_fatal()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_event_type() {
        let raw = r#"{"type":"something.new"}"#;
        assert!(ServerEvent::parse(raw).is_err());
    }
}
