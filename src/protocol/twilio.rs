//! Twilio Media Streams JSON dialect (§6.2).
//!
//! Kept close to `twilio/media.rs::StreamEvent` from the teacher — same
//! `#[serde(tag = "event")]` shape — generalized to cover the full event
//! list the spec names (added `dtmf`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
#[serde(rename_all = "lowercase")]
pub enum IncomingMessage {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMetadata,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Dtmf {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        dtmf: DtmfPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub account_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default, rename = "sampleRate")]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    pub payload: String, // base64-encoded mu-law audio
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DtmfPayload {
    pub digit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

impl IncomingMessage {
    pub fn parse(raw: &str) -> Result<Self, crate::error::RouterError> {
        serde_json::from_str(raw).map_err(|e| crate::error::RouterError::Parse(e.to_string()))
    }

    /// `stream_sid` is absent on `connected` frames, present on every other
    /// frame — mirrors the optionality in the teacher's `StreamEvent`.
    pub fn stream_sid(&self) -> Option<&str> {
        match self {
            IncomingMessage::Connected { .. } => None,
            IncomingMessage::Start { stream_sid, .. }
            | IncomingMessage::Media { stream_sid, .. }
            | IncomingMessage::Stop { stream_sid }
            | IncomingMessage::Dtmf { stream_sid, .. }
            | IncomingMessage::Mark { stream_sid, .. } => Some(stream_sid),
        }
    }
}

/// Outbound frames to Twilio.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
#[serde(rename_all = "lowercase")]
pub enum OutgoingMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutgoingMediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMediaPayload {
    pub payload: String, // base64-encoded mu-law audio, exactly 160 bytes decoded
}

impl OutgoingMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("OutgoingMessage always serializes")
    }
}
