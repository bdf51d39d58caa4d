//! Session Manager (§4.1): per-call state machine and outbound frame
//! construction for both telephony dialects.

use crate::error::SessionError;
use crate::protocol::audiocodes;
use crate::protocol::twilio;

/// Which telephony dialect a session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    AudioCodes,
    Twilio,
}

/// Call lifecycle state (§4.1). Twilio sessions never visit `Initiating`
/// or `Resuming` — its `start` frame plays both roles at once — so those
/// dialects collapse `Connecting -> Active` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Initiating,
    Active,
    Resuming,
    Ending,
    Error,
}

/// Media formats this bridge can speak, in preference order. AudioCodes
/// negotiates from its own `supportedMediaFormats` list against this one
/// (§C.1, supplemented feature); Twilio has exactly one wire format and
/// skips negotiation entirely.
pub const SUPPORTED_MEDIA_FORMATS: &[&str] = &["raw/lpcm16", "audio/x-mulaw"];

/// Per-call session state owned by the Bridge Orchestrator.
#[derive(Debug)]
pub struct SessionManager {
    pub dialect: Dialect,
    pub status: Status,
    pub conversation_id: String,
    pub media_format: Option<String>,
    pub stream_id: Option<String>,
}

impl SessionManager {
    pub fn new(dialect: Dialect, conversation_id: String) -> Self {
        Self {
            dialect,
            status: Status::Disconnected,
            conversation_id,
            media_format: None,
            stream_id: None,
        }
    }

    fn transition(&mut self, to: Status, attempted: &'static str) -> Result<(), SessionError> {
        let allowed = match (self.status, to) {
            (Status::Disconnected, Status::Connecting) => true,
            (Status::Connecting, Status::Initiating) => true,
            (Status::Connecting, Status::Active) => true, // Twilio collapses Initiating
            (Status::Initiating, Status::Active) => true,
            (Status::Active, Status::Resuming) => true,
            (Status::Resuming, Status::Active) => true,
            (_, Status::Ending) => true,
            (_, Status::Error) => true,
            (a, b) if a == b => true,
            _ => false,
        };
        if !allowed {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                attempted,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Negotiate a mutually supported media format (§C.1). Returns the
    /// first entry in `SUPPORTED_MEDIA_FORMATS` that the caller also
    /// offers, or `NoSupportedFormat` if none overlap.
    pub fn negotiate_media_format(offered: &[String]) -> Result<String, SessionError> {
        SUPPORTED_MEDIA_FORMATS
            .iter()
            .find(|supported| offered.iter().any(|o| o == **supported))
            .map(|s| s.to_string())
            .ok_or_else(|| SessionError::NoSupportedFormat(offered.to_vec()))
    }

    /// Handle an inbound `session.initiate` (AudioCodes only).
    pub fn handle_initiate(
        &mut self,
        supported_media_formats: &[String],
    ) -> Result<audiocodes::OutgoingMessage, SessionError> {
        self.transition(Status::Connecting, "initiate")?;
        self.transition(Status::Initiating, "initiate")?;
        let format = Self::negotiate_media_format(supported_media_formats)?;
        self.media_format = Some(format.clone());
        self.transition(Status::Active, "initiate-accept")?;
        Ok(audiocodes::OutgoingMessage::SessionAccepted {
            conversation_id: self.conversation_id.clone(),
            media_format: format,
        })
    }

    /// Handle an inbound `session.resume` (AudioCodes only).
    pub fn handle_resume(&mut self) -> Result<audiocodes::OutgoingMessage, SessionError> {
        if self.status == Status::Disconnected {
            self.transition(Status::Connecting, "resume")?;
        }
        self.transition(Status::Resuming, "resume")?;
        self.transition(Status::Active, "resume-accept")?;
        Ok(audiocodes::OutgoingMessage::SessionResumed {
            conversation_id: self.conversation_id.clone(),
        })
    }

    /// Handle a Twilio `start` frame, which both connects and activates
    /// the session in one step.
    pub fn handle_twilio_start(
        &mut self,
        start: &twilio::StartMetadata,
        stream_sid: &str,
    ) -> Result<(), SessionError> {
        self.transition(Status::Connecting, "start")?;
        self.transition(Status::Active, "start")?;
        self.stream_id = Some(stream_sid.to_string());
        self.media_format = start
            .media_format
            .as_ref()
            .and_then(|f| f.encoding.clone())
            .or_else(|| Some("audio/x-mulaw".to_string()));
        Ok(())
    }

    pub fn handle_connection_validate(&self) -> audiocodes::OutgoingMessage {
        audiocodes::OutgoingMessage::ConnectionValidated {
            conversation_id: self.conversation_id.clone(),
        }
    }

    /// End the session, producing a session-level error reply when
    /// `reason` indicates failure. Idempotent: ending an already-ended
    /// session is a no-op rather than an error (§4.1 "ending or error
    /// states never revert").
    pub fn handle_end(&mut self, reason: Option<&str>) -> Result<(), SessionError> {
        if matches!(self.status, Status::Ending | Status::Error) {
            return Ok(());
        }
        self.transition(Status::Ending, "end")
            .or_else(|_| self.transition(Status::Error, "end"))?;
        let _ = reason;
        Ok(())
    }

    pub fn handle_error(&mut self) {
        // Error states never revert (§4.1); ignore failures transitioning
        // from an already-terminal state.
        let _ = self.transition(Status::Error, "error");
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Ending | Status::Error)
    }
}
