//! Crate-wide error types (§7). One small `thiserror` enum per collaborator,
//! matching the teacher's `pipeline::bridge::BridgeError` /
//! `pipeline::tts::TtsError` texture, plus a top-level enum that wraps them
//! all for call sites that need a single `Result` type.

use thiserror::Error;

/// Errors raised by the Audio Handler (§4.3, §7 `AudioFormatError`/`AudioLoadError`).
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to load audio file: {0}")]
    Load(String),
    #[error("unsupported audio format: {0}")]
    Format(String),
}

/// Errors raised by the Session Manager (§4.1).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("invalid state transition: {from:?} -> {attempted}")]
    InvalidTransition {
        from: crate::session::Status,
        attempted: &'static str,
    },
    #[error("no mutually supported media format in {0:?}")]
    NoSupportedFormat(Vec<String>),
}

/// Errors raised by the Event Router (§4.2, §7 `ProtocolError`).
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("frame has no event discriminator")]
    MissingDiscriminator,
    #[error("failed to parse frame: {0}")]
    Parse(String),
}

/// Errors raised by the Realtime Client (§4.4, §7).
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("rate limit exceeded")]
    RateLimit,
    #[error("client is closing")]
    Closing,
    #[error("remote error: {message} (fatal={fatal})")]
    Remote { message: String, fatal: bool },
}

/// Errors raised by the Bridge Orchestrator (§4.5, §7).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
    #[error("upstream handshake failed, aborting call: {0}")]
    HandshakeAbort(String),
}

/// Aggregate error type for top-level call sites.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
