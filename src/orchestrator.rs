//! Bridge Orchestrator (§4.5): wires Session Manager, Audio Handler, and
//! Realtime Client together for one call, and owns the two data-flow
//! directions described in §4.5.

use base64::Engine;
use tokio::sync::mpsc;

use crate::audio;
use crate::error::OrchestratorError;
use crate::protocol::audiocodes;
use crate::protocol::realtime::{ClientEvent, ConversationItem, ServerEvent};
use crate::protocol::twilio;
use crate::realtime::client::{Notification, RealtimeClient, RealtimeConfig};
use crate::session::{Dialect, SessionManager};

/// Platform-rate/codec constants. AudioCodes speaks whatever was
/// negotiated (defaults to L16 16kHz); Twilio always speaks µ-law 8kHz.
const TWILIO_SAMPLE_RATE: u32 = 8000;
const UPSTREAM_SAMPLE_RATE: u32 = 24000;

/// De-duplicates speech-start/stop events that may arrive from both the
/// platform's own VAD and the upstream server's turn detection within the
/// same 200ms window (Open Question 4, SPEC_FULL.md §D.4).
pub struct SpeechDeduper {
    window: std::time::Duration,
    last_started: Option<std::time::Instant>,
    last_stopped: Option<std::time::Instant>,
}

impl Default for SpeechDeduper {
    fn default() -> Self {
        Self::new(std::time::Duration::from_millis(200))
    }
}

impl SpeechDeduper {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window,
            last_started: None,
            last_stopped: None,
        }
    }

    /// Returns `true` if this `speech_started` should be forwarded (i.e.
    /// it isn't a duplicate of one seen within the window).
    pub fn observe_started(&mut self, now: std::time::Instant) -> bool {
        let fresh = self
            .last_started
            .map(|prev| now.duration_since(prev) > self.window)
            .unwrap_or(true);
        if fresh {
            self.last_started = Some(now);
        }
        fresh
    }

    pub fn observe_stopped(&mut self, now: std::time::Instant) -> bool {
        let fresh = self
            .last_stopped
            .map(|prev| now.duration_since(prev) > self.window)
            .unwrap_or(true);
        if fresh {
            self.last_stopped = Some(now);
        }
        fresh
    }
}

/// One outbound frame destined for the platform socket.
pub enum PlatformFrame {
    AudioCodes(audiocodes::OutgoingMessage),
    Twilio(twilio::OutgoingMessage),
}

impl PlatformFrame {
    pub fn to_json(&self) -> String {
        match self {
            PlatformFrame::AudioCodes(m) => m.to_json(),
            PlatformFrame::Twilio(m) => m.to_json(),
        }
    }
}

/// Owns one call's worth of Session Manager + Realtime Client, and
/// translates frames between the platform dialect and the upstream API.
pub struct BridgeOrchestrator {
    pub session: SessionManager,
    pub realtime: RealtimeClient,
    notify_rx: mpsc::Receiver<Notification>,
    active_response_id: Option<String>,
    speech_dedup: SpeechDeduper,
    play_stream_counter: u64,
    play_stream_started: bool,
    pending_input_bytes: usize,
    /// Upstream-rate PCM16 bytes accumulated since the last flush. Platform
    /// frames arrive far under the 100ms floor (§3, §8 invariant 1) — this
    /// buffer is what actually enforces it before anything reaches
    /// `input_audio_buffer.append`.
    upstream_audio_buffer: Vec<u8>,
}

impl BridgeOrchestrator {
    /// Bring-up steps 2-3 (§4.5): construct components, dial upstream,
    /// run the handshake. Aborts (returns `Err`) without touching the
    /// platform socket on handshake failure — the caller closes the
    /// platform side per §4.5's teardown-on-failure rule.
    pub async fn connect(
        dialect: Dialect,
        conversation_id: String,
        realtime_config: RealtimeConfig,
    ) -> Result<Self, OrchestratorError> {
        let (notify_tx, notify_rx) = mpsc::channel(64);
        let realtime = RealtimeClient::connect(realtime_config, notify_tx)
            .await
            .map_err(|e| OrchestratorError::HandshakeAbort(e.to_string()))?;

        Ok(Self {
            session: SessionManager::new(dialect, conversation_id),
            realtime,
            notify_rx,
            active_response_id: None,
            speech_dedup: SpeechDeduper::default(),
            play_stream_counter: 0,
            play_stream_started: false,
            pending_input_bytes: 0,
            upstream_audio_buffer: Vec::new(),
        })
    }

    /// Handle one inbound AudioCodes frame, returning zero or more
    /// platform-bound replies. Upstream sends happen as a side effect.
    pub async fn handle_audiocodes(
        &mut self,
        msg: audiocodes::IncomingMessage,
    ) -> Result<Vec<PlatformFrame>, OrchestratorError> {
        use audiocodes::IncomingMessage as In;
        match msg {
            In::SessionInitiate {
                supported_media_formats,
                ..
            } => {
                let reply = self.session.handle_initiate(&supported_media_formats)?;
                Ok(vec![PlatformFrame::AudioCodes(reply)])
            }
            In::SessionResume { .. } => {
                let reply = self.session.handle_resume()?;
                Ok(vec![PlatformFrame::AudioCodes(reply)])
            }
            In::SessionEnd { reason, .. } => {
                self.teardown(reason.as_deref()).await?;
                Ok(vec![])
            }
            In::ConnectionValidate { .. } => {
                Ok(vec![PlatformFrame::AudioCodes(
                    self.session.handle_connection_validate(),
                )])
            }
            In::UserStreamStart { .. } | In::UserStreamStop { .. } => Ok(vec![]),
            In::UserStreamChunk { audio_chunk, .. } => {
                self.forward_platform_audio(&audio_chunk).await?;
                Ok(vec![])
            }
            In::Activities { activities, .. } => {
                for raw in &activities {
                    match audiocodes::Activity::classify(raw) {
                        audiocodes::Activity::Dtmf { digit } => {
                            tracing::info!(digit = %digit, "DTMF activity received");
                        }
                        audiocodes::Activity::Hangup => {
                            self.teardown(Some("caller hangup")).await?;
                        }
                        audiocodes::Activity::Custom(_) => {}
                    }
                }
                Ok(vec![])
            }
        }
    }

    /// Handle one inbound Twilio frame.
    pub async fn handle_twilio(
        &mut self,
        msg: twilio::IncomingMessage,
    ) -> Result<Vec<PlatformFrame>, OrchestratorError> {
        use twilio::IncomingMessage as In;
        match msg {
            In::Connected { .. } => Ok(vec![]),
            In::Start { start, stream_sid } => {
                self.session.handle_twilio_start(&start, &stream_sid)?;
                Ok(vec![])
            }
            In::Media { media, .. } => {
                let mulaw = base64::engine::general_purpose::STANDARD
                    .decode(&media.payload)
                    .map_err(|e| {
                        OrchestratorError::Audio(crate::error::AudioError::Format(e.to_string()))
                    })?;
                let pcm8k = audio::decode_mulaw(&mulaw);
                let pcm_upstream = audio::resample(&pcm8k, TWILIO_SAMPLE_RATE, UPSTREAM_SAMPLE_RATE);
                self.send_pcm_to_upstream(&pcm_upstream).await?;
                Ok(vec![])
            }
            In::Stop { .. } => {
                self.teardown(None).await?;
                Ok(vec![])
            }
            In::Dtmf { dtmf, .. } => {
                tracing::info!(digit = %dtmf.digit, "DTMF activity received");
                Ok(vec![])
            }
            In::Mark { .. } => Ok(vec![]),
        }
    }

    async fn forward_platform_audio(&mut self, audio_chunk_b64: &str) -> Result<(), OrchestratorError> {
        let pcm_bytes = base64::engine::general_purpose::STANDARD
            .decode(audio_chunk_b64)
            .map_err(|e| OrchestratorError::Audio(crate::error::AudioError::Format(e.to_string())))?;
        let samples: Vec<i16> = pcm_bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        self.send_pcm_to_upstream(&samples).await
    }

    /// Buffer upstream-rate PCM16 samples and flush complete 100ms-floor
    /// chunks as `input_audio_buffer.append` events (§3, §8 invariant 1).
    /// Platform frames (a 20ms Twilio media frame, an AudioCodes
    /// `userStream.chunk`) are almost always smaller than the floor on
    /// their own, so this accumulates across calls the way
    /// `audio::chunk_with_floor` pads a single batch — here across a
    /// stream instead of one fixed buffer.
    async fn send_pcm_to_upstream(&mut self, samples: &[i16]) -> Result<(), OrchestratorError> {
        if samples.is_empty() {
            return Ok(());
        }
        self.upstream_audio_buffer
            .extend(samples.iter().flat_map(|s| s.to_le_bytes()));
        self.flush_upstream_audio().await
    }

    /// Drain every complete floor-sized chunk currently buffered, leaving
    /// any short remainder for the next call (or for `teardown` to pad).
    async fn flush_upstream_audio(&mut self) -> Result<(), OrchestratorError> {
        let floor = audio::floor_bytes(UPSTREAM_SAMPLE_RATE, 2);
        while self.upstream_audio_buffer.len() >= floor {
            let chunk: Vec<u8> = self.upstream_audio_buffer.drain(..floor).collect();
            self.send_upstream_append(chunk).await?;
        }
        Ok(())
    }

    async fn send_upstream_append(&mut self, bytes: Vec<u8>) -> Result<(), OrchestratorError> {
        self.pending_input_bytes += bytes.len();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        self.realtime
            .send_event(&ClientEvent::InputAudioBufferAppend { audio: encoded })
            .await?;
        Ok(())
    }

    /// Teardown (§4.5): flush any short trailing audio (silence-padded up
    /// to the floor, same zero-byte PCM16 padding `chunk_with_floor` uses),
    /// commit pending input audio, close upstream, and signal the session
    /// as ending. The caller is responsible for closing the platform
    /// socket itself.
    pub async fn teardown(&mut self, reason: Option<&str>) -> Result<(), OrchestratorError> {
        if !self.upstream_audio_buffer.is_empty() {
            let floor = audio::floor_bytes(UPSTREAM_SAMPLE_RATE, 2);
            let mut remainder = std::mem::take(&mut self.upstream_audio_buffer);
            remainder.resize(remainder.len().max(floor), 0);
            let _ = self.send_upstream_append(remainder).await;
        }
        if self.pending_input_bytes > 0 {
            let _ = self
                .realtime
                .send_event(&ClientEvent::InputAudioBufferCommit)
                .await;
            self.pending_input_bytes = 0;
        }
        self.realtime.close().await;
        self.session.handle_end(reason)?;
        Ok(())
    }

    /// Drain one pending notification from the Realtime Client (server
    /// event, reconnect restored/lost), translating it into zero or more
    /// platform-bound frames (§4.5's upstream→platform data flow).
    pub async fn poll_upstream(&mut self) -> Option<Vec<PlatformFrame>> {
        let notification = self.notify_rx.recv().await?;
        Some(match notification {
            Notification::ServerEvent(event) => self.handle_upstream_event(event).await,
            Notification::Restored => {
                tracing::info!(conversation_id = %self.session.conversation_id, "upstream connection restored");
                vec![]
            }
            Notification::Lost => {
                tracing::warn!(conversation_id = %self.session.conversation_id, "upstream connection lost permanently");
                self.session.handle_error();
                vec![self.dialect_error_frame("upstream connection lost")]
            }
        })
    }

    async fn handle_upstream_event(&mut self, event: ServerEvent) -> Vec<PlatformFrame> {
        match event {
            ServerEvent::ResponseCreated { response } => {
                self.active_response_id = Some(response.id);
                vec![]
            }
            ServerEvent::ResponseDone { response }
                if self.active_response_id.as_deref() == Some(response.id.as_str()) =>
            {
                self.active_response_id = None;
                self.end_play_stream()
            }
            ServerEvent::ResponseCancelled { response_id }
                if self.active_response_id.as_deref() == Some(response_id.as_str()) =>
            {
                self.active_response_id = None;
                self.end_play_stream()
            }
            ServerEvent::AudioDelta { response_id, delta } => {
                // §5 ordering guarantee: discard deltas for a response
                // that is no longer active (cancelled-response race, §8
                // scenario S5).
                if self.active_response_id.as_deref() != Some(response_id.as_str()) {
                    return vec![];
                }
                self.translate_audio_delta(&delta)
            }
            ServerEvent::SpeechStarted { .. } => {
                if self.speech_dedup.observe_started(std::time::Instant::now()) {
                    vec![self.speech_started_frame()]
                } else {
                    vec![]
                }
            }
            ServerEvent::SpeechStopped { .. } => {
                if self.speech_dedup.observe_stopped(std::time::Instant::now()) {
                    vec![self.speech_stopped_frame()]
                } else {
                    vec![]
                }
            }
            ServerEvent::Error { error } => {
                let fatal = error.is_fatal();
                tracing::warn!(message = %error.message, code = ?error.code, fatal, "upstream error event");
                if fatal {
                    self.session.handle_error();
                    vec![self.dialect_error_frame(&error.message)]
                } else {
                    vec![]
                }
            }
            _ => vec![], // remaining families are opaque pass-through / log-only (§1, §4.2)
        }
    }

    fn translate_audio_delta(&mut self, delta_b64: &str) -> Vec<PlatformFrame> {
        let Ok(pcm_bytes) = base64::engine::general_purpose::STANDARD.decode(delta_b64) else {
            return vec![];
        };
        let samples: Vec<i16> = pcm_bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        let mut frames = Vec::new();
        if self.session.dialect == Dialect::AudioCodes && !self.play_stream_started {
            self.play_stream_started = true;
            frames.push(PlatformFrame::AudioCodes(audiocodes::OutgoingMessage::PlayStreamStart {
                conversation_id: self.session.conversation_id.clone(),
                stream_id: self.current_stream_id(),
                media_format: self.session.media_format.clone().unwrap_or_default(),
            }));
        }

        match self.session.dialect {
            Dialect::Twilio => {
                let pcm8k = audio::resample(&samples, UPSTREAM_SAMPLE_RATE, TWILIO_SAMPLE_RATE);
                let mulaw = audio::encode_mulaw(&pcm8k);
                frames.extend(audio::frame_for_twilio(&mulaw).into_iter().map(|frame| {
                    PlatformFrame::Twilio(twilio::OutgoingMessage::Media {
                        stream_sid: self.session.stream_id.clone().unwrap_or_default(),
                        media: twilio::OutgoingMediaPayload {
                            payload: base64::engine::general_purpose::STANDARD.encode(frame),
                        },
                    })
                }));
            }
            Dialect::AudioCodes => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&pcm_bytes);
                frames.push(PlatformFrame::AudioCodes(audiocodes::OutgoingMessage::PlayStreamChunk {
                    conversation_id: self.session.conversation_id.clone(),
                    stream_id: self.current_stream_id(),
                    audio_chunk: encoded,
                }));
            }
        }
        frames
    }

    fn current_stream_id(&self) -> String {
        format!("play-{}", self.play_stream_counter)
    }

    /// Emit the dialect's end-of-playback marker and advance the stream
    /// id counter so the next response gets a fresh `streamId`.
    fn end_play_stream(&mut self) -> Vec<PlatformFrame> {
        let frame = match self.session.dialect {
            Dialect::Twilio => PlatformFrame::Twilio(twilio::OutgoingMessage::Mark {
                stream_sid: self.session.stream_id.clone().unwrap_or_default(),
                mark: twilio::MarkPayload {
                    name: "response_end".into(),
                },
            }),
            Dialect::AudioCodes => PlatformFrame::AudioCodes(audiocodes::OutgoingMessage::PlayStreamStop {
                conversation_id: self.session.conversation_id.clone(),
                stream_id: self.current_stream_id(),
            }),
        };
        self.play_stream_counter += 1;
        self.play_stream_started = false;
        vec![frame]
    }

    fn speech_started_frame(&self) -> PlatformFrame {
        PlatformFrame::AudioCodes(audiocodes::OutgoingMessage::SpeechStarted {
            conversation_id: self.session.conversation_id.clone(),
        })
    }

    fn speech_stopped_frame(&self) -> PlatformFrame {
        PlatformFrame::AudioCodes(audiocodes::OutgoingMessage::SpeechStopped {
            conversation_id: self.session.conversation_id.clone(),
        })
    }

    fn dialect_error_frame(&self, reason: &str) -> PlatformFrame {
        match self.session.dialect {
            Dialect::Twilio => PlatformFrame::Twilio(twilio::OutgoingMessage::Clear {
                stream_sid: self.session.stream_id.clone().unwrap_or_default(),
            }),
            Dialect::AudioCodes => PlatformFrame::AudioCodes(audiocodes::OutgoingMessage::SessionError {
                conversation_id: self.session.conversation_id.clone(),
                reason: reason.to_string(),
            }),
        }
    }

    /// Send an opaque conversation item created by the orchestrator (e.g.
    /// the initial greeting instruction, §4.5 bring-up step 4).
    pub async fn send_conversation_item(
        &mut self,
        item: ConversationItem,
    ) -> Result<(), OrchestratorError> {
        self.realtime
            .send_event(&ClientEvent::ConversationItemCreate { item })
            .await?;
        Ok(())
    }

    pub async fn request_response(&mut self) -> Result<(), OrchestratorError> {
        self.realtime
            .send_event(&ClientEvent::ResponseCreate { response: None })
            .await?;
        Ok(())
    }

    /// Bring-up step 4 (§4.5): forward the initial greeting instruction to
    /// upstream as a conversation item, then request the opening response.
    /// The greeting text itself is opaque configuration (§1), not authored
    /// here — `instructions` being absent still begins normal operation
    /// with a bare `response.create`.
    pub async fn send_greeting(&mut self, instructions: Option<&str>) -> Result<(), OrchestratorError> {
        if let Some(text) = instructions {
            self.send_conversation_item(ConversationItem {
                id: None,
                kind: "message".to_string(),
                role: Some("system".to_string()),
                content: vec![serde_json::json!({"type": "input_text", "text": text})],
            })
            .await?;
        }
        self.request_response().await
    }

    /// Translate a fatal error from `handle_audiocodes`/`handle_twilio` into
    /// a platform-facing `session.error` frame (§4.1's failure semantics,
    /// §7 `AudioFormatError` → "session.error to platform"). A
    /// `SessionError` means the Session Manager's own state machine broke
    /// (bad frame, invalid transition, no supported media format) and the
    /// call cannot continue; anything else (a single malformed audio
    /// chunk, say) is left to the caller to just log and keep going.
    pub fn fatal_error_frame(&self, err: &OrchestratorError) -> Option<PlatformFrame> {
        match err {
            OrchestratorError::Session(_) => Some(self.dialect_error_frame(&err.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::realtime_server;
    use crate::protocol::realtime::ResponseObject;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;

    #[test]
    fn speech_deduper_drops_duplicates_within_window() {
        let mut dedup = SpeechDeduper::new(Duration::from_millis(200));
        let t0 = Instant::now();
        assert!(dedup.observe_started(t0));
        assert!(!dedup.observe_started(t0 + Duration::from_millis(50)));
        assert!(dedup.observe_started(t0 + Duration::from_millis(250)));
    }

    #[test]
    fn speech_deduper_tracks_started_and_stopped_independently() {
        let mut dedup = SpeechDeduper::new(Duration::from_millis(200));
        let t0 = Instant::now();
        assert!(dedup.observe_started(t0));
        assert!(dedup.observe_stopped(t0));
    }

    /// Connect against a freshly bound in-process mock upstream, purely so
    /// `handle_upstream_event` has a real `BridgeOrchestrator` to run on.
    async fn orchestrator_against_mock(dialect: Dialect) -> BridgeOrchestrator {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock upstream");
        let addr = listener.local_addr().expect("local_addr");
        tokio::spawn(async move {
            axum::serve(listener, realtime_server::router()).await.expect("mock upstream error");
        });

        let config = RealtimeConfig {
            host: addr.to_string(),
            model: "test-model".to_string(),
            api_key: "test-key".to_string(),
            session: crate::protocol::realtime::SessionConfig::default(),
            heartbeat_interval: Duration::from_secs(60),
            queue_capacity: 32,
            insecure: true,
        };
        BridgeOrchestrator::connect(dialect, "c1".into(), config)
            .await
            .expect("handshake against mock upstream should succeed")
    }

    /// §7 `RemoteError` — a fatal upstream error (by `RealtimeErrorDetail::is_fatal`)
    /// must mark the session errored and produce a platform-facing error
    /// frame; an ordinary, non-fatal error must not.
    #[tokio::test]
    async fn fatal_upstream_error_marks_session_errored() {
        use crate::protocol::realtime::RealtimeErrorDetail;
        use crate::session::Status;

        let mut orchestrator = orchestrator_against_mock(Dialect::AudioCodes).await;

        let frames = orchestrator
            .handle_upstream_event(ServerEvent::Error {
                error: RealtimeErrorDetail {
                    code: Some("invalid_request".into()),
                    message: "bad turn".into(),
                    fatal: false,
                },
            })
            .await;
        assert!(frames.is_empty(), "a non-fatal error must not close the call");
        assert_ne!(orchestrator.session.status, Status::Error);

        let frames = orchestrator
            .handle_upstream_event(ServerEvent::Error {
                error: RealtimeErrorDetail {
                    code: Some("session_expired".into()),
                    message: "session expired".into(),
                    fatal: false,
                },
            })
            .await;
        assert_eq!(frames.len(), 1, "a fatal error must produce one platform-facing frame");
        assert!(matches!(
            frames[0],
            PlatformFrame::AudioCodes(audiocodes::OutgoingMessage::SessionError { .. })
        ));
        assert_eq!(orchestrator.session.status, Status::Error);
    }

    /// §3/§8 invariant 1 — a single undersized platform frame must not
    /// reach upstream on its own; it waits in `upstream_audio_buffer`
    /// until enough has accumulated to meet the 100ms floor.
    #[tokio::test]
    async fn undersized_platform_audio_is_buffered_not_forwarded_immediately() {
        let mut orchestrator = orchestrator_against_mock(Dialect::AudioCodes).await;
        let floor = audio::floor_bytes(UPSTREAM_SAMPLE_RATE, 2);

        let small: Vec<i16> = vec![0; 100]; // 200 bytes, far under the 4800-byte floor
        orchestrator.send_pcm_to_upstream(&small).await.unwrap();
        assert_eq!(orchestrator.pending_input_bytes, 0, "nothing should have been sent yet");
        assert_eq!(orchestrator.upstream_audio_buffer.len(), 200);

        // Already sent 200 bytes above; send just enough more to land
        // exactly on the floor (4800 bytes / 200 bytes per call = 24 calls).
        let calls_needed = floor.div_ceil(200);
        for _ in 1..calls_needed {
            assert_eq!(orchestrator.pending_input_bytes, 0, "still under the floor");
            orchestrator.send_pcm_to_upstream(&small).await.unwrap();
        }
        assert!(
            orchestrator.pending_input_bytes >= floor,
            "crossing the floor must flush a chunk upstream"
        );
        assert!(
            orchestrator.upstream_audio_buffer.len() < floor,
            "a flushed chunk leaves only a sub-floor remainder buffered"
        );
    }

    /// Same as `orchestrator_against_mock`, but captures the `type` of
    /// every client event the mock upstream receives.
    async fn orchestrator_against_mock_with_capture(
        dialect: Dialect,
    ) -> (BridgeOrchestrator, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock upstream");
        let addr = listener.local_addr().expect("local_addr");
        let app = realtime_server::router_with_capture(tx);
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock upstream error");
        });

        let config = RealtimeConfig {
            host: addr.to_string(),
            model: "test-model".to_string(),
            api_key: "test-key".to_string(),
            session: crate::protocol::realtime::SessionConfig::default(),
            heartbeat_interval: Duration::from_secs(60),
            queue_capacity: 32,
            insecure: true,
        };
        let orchestrator = BridgeOrchestrator::connect(dialect, "c1".into(), config)
            .await
            .expect("handshake against mock upstream should succeed");
        (orchestrator, rx)
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<String>, budget: Duration) -> Vec<String> {
        let mut out = Vec::new();
        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) => out.push(event),
                _ => break,
            }
        }
        out
    }

    /// §7 — a `SessionError` is the only orchestrator error fatal enough to
    /// translate into a platform-facing frame; other errors are not.
    #[tokio::test]
    async fn fatal_error_frame_covers_session_errors_only() {
        let orchestrator = orchestrator_against_mock(Dialect::AudioCodes).await;

        let session_err = OrchestratorError::Session(crate::error::SessionError::NoSupportedFormat(vec!["x".into()]));
        assert!(orchestrator.fatal_error_frame(&session_err).is_some());

        let audio_err = OrchestratorError::Audio(crate::error::AudioError::Format("bad base64".into()));
        assert!(orchestrator.fatal_error_frame(&audio_err).is_none());
    }

    /// §4.5 bring-up step 4 — with a configured greeting, upstream sees the
    /// conversation item before the response request; with none configured,
    /// it just sees the response request.
    #[tokio::test]
    async fn send_greeting_forwards_item_then_requests_response() {
        let (mut orchestrator, mut capture) = orchestrator_against_mock_with_capture(Dialect::AudioCodes).await;
        drain(&mut capture, Duration::from_millis(200)).await; // handshake's own session.update

        orchestrator.send_greeting(Some("say hello")).await.unwrap();
        let seen = drain(&mut capture, Duration::from_millis(500)).await;
        assert_eq!(seen, vec!["conversation.item.create", "response.create"]);
    }

    #[tokio::test]
    async fn send_greeting_without_instructions_only_requests_response() {
        let (mut orchestrator, mut capture) = orchestrator_against_mock_with_capture(Dialect::AudioCodes).await;
        drain(&mut capture, Duration::from_millis(200)).await;

        orchestrator.send_greeting(None).await.unwrap();
        let seen = drain(&mut capture, Duration::from_millis(500)).await;
        assert_eq!(seen, vec!["response.create"]);
    }

    /// S8 scenario S5 — deltas for a response that is no longer active
    /// (already cancelled) must be discarded, not translated or forwarded.
    #[tokio::test]
    async fn cancelled_response_audio_deltas_are_discarded() {
        let mut orchestrator = orchestrator_against_mock(Dialect::AudioCodes).await;

        let created = orchestrator
            .handle_upstream_event(ServerEvent::ResponseCreated {
                response: ResponseObject {
                    id: "resp-1".into(),
                    status: Some("in_progress".into()),
                },
            })
            .await;
        assert!(created.is_empty());
        assert_eq!(orchestrator.active_response_id.as_deref(), Some("resp-1"));

        let cancelled = orchestrator
            .handle_upstream_event(ServerEvent::ResponseCancelled {
                response_id: "resp-1".into(),
            })
            .await;
        assert!(cancelled.is_empty(), "a cancel with no prior audio has nothing to stop");
        assert_eq!(orchestrator.active_response_id, None);

        for _ in 0..3 {
            let late_delta = orchestrator
                .handle_upstream_event(ServerEvent::AudioDelta {
                    response_id: "resp-1".into(),
                    delta: "AAAA".into(),
                })
                .await;
            assert!(late_delta.is_empty(), "late delta for a cancelled response must be discarded");
        }
    }

    /// A response that is still active translates its deltas normally and
    /// emits a clean `playStream.stop` once done.
    #[tokio::test]
    async fn active_response_deltas_translate_and_close_cleanly() {
        let mut orchestrator = orchestrator_against_mock(Dialect::AudioCodes).await;

        orchestrator
            .handle_upstream_event(ServerEvent::ResponseCreated {
                response: ResponseObject {
                    id: "resp-2".into(),
                    status: Some("in_progress".into()),
                },
            })
            .await;

        let frames = orchestrator
            .handle_upstream_event(ServerEvent::AudioDelta {
                response_id: "resp-2".into(),
                delta: "AAAA".into(),
            })
            .await;
        assert_eq!(frames.len(), 2, "first delta emits playStream.start then playStream.chunk");
        assert!(matches!(
            frames[0],
            PlatformFrame::AudioCodes(audiocodes::OutgoingMessage::PlayStreamStart { .. })
        ));

        let done = orchestrator
            .handle_upstream_event(ServerEvent::ResponseDone {
                response: ResponseObject {
                    id: "resp-2".into(),
                    status: Some("completed".into()),
                },
            })
            .await;
        assert_eq!(done.len(), 1);
        assert!(matches!(
            done[0],
            PlatformFrame::AudioCodes(audiocodes::OutgoingMessage::PlayStreamStop { .. })
        ));
        assert_eq!(orchestrator.active_response_id, None);
    }
}
