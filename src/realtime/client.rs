//! Realtime Client (§4.4) — the hardest part: owns the upstream WebSocket
//! for its entire lifetime. TLS dial, session handshake, three cooperative
//! tasks (Receiver, Heartbeat, Sender-via-lock), rate limiting, reconnect
//! with backoff+jitter, and a bounded audio output queue.
//!
//! Task shape follows the `tokio::select!` multiplexing the teacher uses
//! in `twilio/media.rs::handle_media_stream`, generalized into a
//! standalone client instead of one inline handler function.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::error::RealtimeError;
use crate::protocol::realtime::{ClientEvent, ServerEvent, SessionConfig};
use crate::realtime::queue::AudioQueue;
use crate::realtime::rate_limit::RateLimiter;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const PONG_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_BASE_DELAY_SECS: f64 = 2.0;
const RECONNECT_MAX_DELAY_SECS: f64 = 30.0;
const RECONNECT_JITTER: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialState {
    Disconnected,
    Dialing,
    Handshaking,
    Active,
    Closing,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub host: String,
    pub model: String,
    pub api_key: String,
    pub session: SessionConfig,
    pub heartbeat_interval: Duration,
    pub queue_capacity: usize,
    /// Dial `ws://` instead of `wss://`. Never set by `config.rs`; exists
    /// so tests can point this client at an in-process loopback server
    /// (`mock::realtime_server`) without a TLS certificate.
    pub insecure: bool,
}

/// Notifications the background tasks push to the orchestrator. Kept
/// separate from the audio queue, which carries only decoded chunks.
#[derive(Debug)]
pub enum Notification {
    ServerEvent(ServerEvent),
    Restored,
    Lost,
}

struct Shared {
    state: std::sync::Mutex<DialState>,
    closing: AtomicBool,
    reconnecting: AtomicBool,
    reconnect_attempts: AtomicU32,
    rate_limiter: std::sync::Mutex<RateLimiter>,
    queue: AsyncMutex<AudioQueue>,
    pong_received: Notify,
}

/// Owns the upstream WebSocket for the lifetime of one call.
pub struct RealtimeClient {
    config: RealtimeConfig,
    shared: Arc<Shared>,
    write: Arc<AsyncMutex<Option<WsSink>>>,
    notify_tx: mpsc::Sender<Notification>,
    receiver_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    /// Dial, handshake, and start the Receiver + Heartbeat tasks. Only one
    /// `connect()` is meaningful per client instance (§4.4.1).
    pub async fn connect(
        config: RealtimeConfig,
        notify_tx: mpsc::Sender<Notification>,
    ) -> Result<Self, RealtimeError> {
        let shared = Arc::new(Shared {
            state: std::sync::Mutex::new(DialState::Disconnected),
            closing: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            rate_limiter: std::sync::Mutex::new(RateLimiter::new()),
            queue: AsyncMutex::new(AudioQueue::new(config.queue_capacity)),
            pong_received: Notify::new(),
        });

        let (sink, stream) = dial_and_handshake(&config, &shared, HANDSHAKE_TIMEOUT).await?;
        let write = Arc::new(AsyncMutex::new(Some(sink)));

        let mut client = Self {
            config,
            shared,
            write,
            notify_tx,
            receiver_task: None,
            heartbeat_task: None,
        };
        client.spawn_tasks(stream);
        Ok(client)
    }

    fn spawn_tasks(&mut self, stream: futures_util::stream::SplitStream<WsStream>) {
        let last_activity = Arc::new(std::sync::Mutex::new(Instant::now()));

        let receiver_task = tokio::spawn(receiver_loop(
            stream,
            self.shared.clone(),
            self.write.clone(),
            self.notify_tx.clone(),
            self.config.clone(),
            last_activity.clone(),
        ));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            self.shared.clone(),
            self.write.clone(),
            self.config.heartbeat_interval,
            last_activity,
            self.notify_tx.clone(),
            self.config.clone(),
        ));

        self.receiver_task = Some(receiver_task);
        self.heartbeat_task = Some(heartbeat_task);
    }

    /// Send a client event, applying the rate limiter first (§4.4.5).
    /// Returns `RealtimeError::RateLimit` without sending or recording
    /// anything against the window.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), RealtimeError> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(RealtimeError::Closing);
        }
        let bytes = event.byte_cost();
        let now = Instant::now().into_std();
        {
            let mut limiter = self.shared.rate_limiter.lock().expect("rate limiter poisoned");
            if !limiter.check(now, bytes) {
                return Err(RealtimeError::RateLimit);
            }
            limiter.record(now, bytes);
        }
        self.write_json(&event.to_json()).await
    }

    async fn write_json(&self, json: &str) -> Result<(), RealtimeError> {
        let mut guard = self.write.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(Message::Text(json.to_string().into()))
                .await
                .map_err(|e| RealtimeError::Transport(e.to_string())),
            None => Err(RealtimeError::Closing),
        }
    }

    /// Pop one chunk from the audio output queue. Non-blocking first
    /// (§4.4.4); if empty, awaits up to `timeout` before giving up.
    pub async fn try_receive_audio_chunk(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut queue = self.shared.queue.lock().await;
        match tokio::time::timeout(timeout, queue.pop()).await {
            Ok(chunk) => chunk,
            Err(_) => None,
        }
    }

    /// True once the output queue is at or above its 80% watermark
    /// (§4.4.4) — the orchestrator may throttle sends in response.
    pub async fn queue_pressure(&self) -> bool {
        self.shared.queue.lock().await.at_watermark()
    }

    pub fn dial_state(&self) -> DialState {
        *self.shared.state.lock().expect("dial state poisoned")
    }

    /// Idempotent teardown (§4.4.8): set `closing`, join receiver +
    /// heartbeat with a 1s budget, close the socket, drain the queue.
    pub async fn close(&mut self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return; // already closing/closed
        }
        *self.shared.state.lock().expect("dial state poisoned") = DialState::Closing;

        for task in [self.receiver_task.take(), self.heartbeat_task.take()].into_iter().flatten() {
            task.abort();
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }

        if let Some(mut sink) = self.write.lock().await.take() {
            let _ = sink.close().await;
        }

        self.shared.queue.lock().await.drain();

        *self.shared.state.lock().expect("dial state poisoned") = DialState::Disconnected;
    }
}

async fn dial_and_handshake(
    config: &RealtimeConfig,
    shared: &Arc<Shared>,
    handshake_timeout: Duration,
) -> Result<(WsSink, futures_util::stream::SplitStream<WsStream>), RealtimeError> {
    *shared.state.lock().expect("dial state poisoned") = DialState::Dialing;

    let scheme = if config.insecure { "ws" } else { "wss" };
    let url = format!("{scheme}://{}/realtime?model={}", config.host, config.model);
    let mut request = url
        .into_client_request()
        .map_err(|e| RealtimeError::Transport(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(
        "Authorization",
        format!("Bearer {}", config.api_key)
            .parse()
            .map_err(|_| RealtimeError::Handshake("invalid api key header".into()))?,
    );
    headers.insert("OpenAI-Beta", "realtime=v1".parse().expect("static header value"));

    let ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default()
        .max_frame_size(Some(MAX_FRAME_SIZE))
        .max_message_size(Some(MAX_FRAME_SIZE));
    let (ws, _response) = tokio::time::timeout(
        handshake_timeout,
        tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false),
    )
    .await
    .map_err(|_| RealtimeError::Handshake("dial timed out".into()))?
    .map_err(|e| RealtimeError::Transport(e.to_string()))?;

    *shared.state.lock().expect("dial state poisoned") = DialState::Handshaking;
    let (mut sink, mut stream) = ws.split();

    let update = ClientEvent::SessionUpdate {
        session: config.session.clone(),
    };
    sink.send(Message::Text(update.to_json().into()))
        .await
        .map_err(|e| RealtimeError::Transport(e.to_string()))?;

    let created = tokio::time::timeout(handshake_timeout, wait_for_session_created(&mut stream)).await;
    match created {
        Ok(Ok(())) => {
            *shared.state.lock().expect("dial state poisoned") = DialState::Active;
            Ok((sink, stream))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(RealtimeError::Handshake(
            "no session.created within handshake window".into(),
        )),
    }
}

async fn wait_for_session_created(
    stream: &mut futures_util::stream::SplitStream<WsStream>,
) -> Result<(), RealtimeError> {
    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| RealtimeError::Transport(e.to_string()))?;
        if let Message::Text(text) = msg {
            if let Ok(event) = ServerEvent::parse(&text) {
                if matches!(event, ServerEvent::SessionCreated { .. }) {
                    return Ok(());
                }
            }
        }
    }
    Err(RealtimeError::Handshake("socket closed before session.created".into()))
}

async fn receiver_loop(
    mut stream: futures_util::stream::SplitStream<WsStream>,
    shared: Arc<Shared>,
    write: Arc<AsyncMutex<Option<WsSink>>>,
    notify_tx: mpsc::Sender<Notification>,
    config: RealtimeConfig,
    last_activity: Arc<std::sync::Mutex<Instant>>,
) {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next()).await;
        let msg = match next {
            Ok(Some(Ok(m))) => m,
            Ok(Some(Err(e))) => {
                tracing::warn!("upstream websocket error: {e}");
                break;
            }
            Ok(None) => {
                tracing::info!("upstream websocket closed by peer");
                break;
            }
            Err(_) => continue, // per-frame receive timeout just re-arms (§5)
        };

        *last_activity.lock().expect("last_activity poisoned") = Instant::now();

        match msg {
            Message::Text(text) => handle_server_text(&text, &shared, &notify_tx).await,
            Message::Binary(bytes) => handle_server_binary(bytes.to_vec(), &shared).await,
            Message::Close(_) => {
                tracing::info!("upstream sent close frame");
                break;
            }
            Message::Pong(_) => shared.pong_received.notify_one(),
            Message::Ping(_) | Message::Frame(_) => {}
        }
    }

    if shared.closing.load(Ordering::SeqCst) {
        return; // our own close(), not a loss
    }

    let _ = notify_tx.send(Notification::Lost).await;
    reconnect_loop(shared, write, notify_tx, config).await;
}

async fn handle_server_text(text: &str, shared: &Arc<Shared>, notify_tx: &mpsc::Sender<Notification>) {
    let event = match ServerEvent::parse(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "malformed upstream frame, dropping");
            return;
        }
    };

    if crate::protocol::realtime::is_log_only(event.type_name()) {
        tracing::info!(event = event.type_name(), "upstream log-only event");
    }

    if let ServerEvent::AudioDelta { delta, .. } = &event {
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(delta) {
            enqueue_audio(shared, bytes).await;
        }
    }

    let _ = notify_tx.send(Notification::ServerEvent(event)).await;
}

async fn handle_server_binary(bytes: Vec<u8>, shared: &Arc<Shared>) {
    // §4.4.7: binary frames that base64-decode as audio are treated as
    // audio; here the server is expected to send raw PCM directly, so any
    // binary frame is queued as-is rather than double-decoded.
    enqueue_audio(shared, bytes).await;
}

async fn enqueue_audio(shared: &Arc<Shared>, bytes: Vec<u8>) {
    let queue = shared.queue.lock().await;
    if !queue.try_push(bytes) {
        tracing::warn!("audio output queue full, dropping chunk");
    }
}

async fn heartbeat_loop(
    shared: Arc<Shared>,
    write: Arc<AsyncMutex<Option<WsSink>>>,
    interval: Duration,
    last_activity: Arc<std::sync::Mutex<Instant>>,
    notify_tx: mpsc::Sender<Notification>,
    config: RealtimeConfig,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if shared.closing.load(Ordering::SeqCst) {
            return;
        }
        let idle = Instant::now().duration_since(*last_activity.lock().expect("last_activity poisoned"));
        if idle <= interval {
            continue;
        }
        let sent = {
            let mut guard = write.lock().await;
            match guard.as_mut() {
                Some(sink) => sink.send(Message::Ping(Vec::new().into())).await.is_ok(),
                None => false,
            }
        };
        if !sent || tokio::time::timeout(PONG_TIMEOUT, shared.pong_received.notified())
            .await
            .is_err()
        {
            tracing::warn!("heartbeat ping unanswered, connection presumed dead");
            if shared.closing.load(Ordering::SeqCst) {
                return;
            }
            let _ = notify_tx.send(Notification::Lost).await;
            reconnect_loop(shared, write, notify_tx, config).await;
            return;
        }
    }
}

/// Exponential backoff with 30% jitter, bounded at 30s (§4.4.6, §8
/// invariant 4). `attempt` is 1-indexed.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = (RECONNECT_BASE_DELAY_SECS * 2f64.powi(attempt as i32 - 1)).min(RECONNECT_MAX_DELAY_SECS);
    let jitter = rand::thread_rng().gen_range(0.0..(base * RECONNECT_JITTER));
    Duration::from_secs_f64(base + jitter)
}

async fn reconnect_loop(
    shared: Arc<Shared>,
    write: Arc<AsyncMutex<Option<WsSink>>>,
    notify_tx: mpsc::Sender<Notification>,
    config: RealtimeConfig,
) {
    if shared.reconnecting.swap(true, Ordering::SeqCst) {
        return; // at-most-one reconnect in flight (§4.4.6)
    }
    *shared.state.lock().expect("dial state poisoned") = DialState::Reconnecting;

    let mut attempt = 1;
    while attempt <= MAX_RECONNECT_ATTEMPTS && !shared.closing.load(Ordering::SeqCst) {
        let delay = backoff_delay(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_for_closing(&shared) => {
                shared.reconnecting.store(false, Ordering::SeqCst);
                return; // close() aborted the in-flight backoff sleep
            }
        }

        match dial_and_handshake(&config, &shared, RECONNECT_HANDSHAKE_TIMEOUT).await {
            Ok((sink, stream)) => {
                *write.lock().await = Some(sink);
                shared.reconnect_attempts.store(0, Ordering::SeqCst);
                shared.reconnecting.store(false, Ordering::SeqCst);
                let _ = notify_tx.send(Notification::Restored).await;
                let last_activity = Arc::new(std::sync::Mutex::new(Instant::now()));
                tokio::spawn(receiver_loop(
                    stream,
                    shared.clone(),
                    write.clone(),
                    notify_tx.clone(),
                    config.clone(),
                    last_activity,
                ));
                return;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                attempt += 1;
            }
        }
    }

    shared.reconnecting.store(false, Ordering::SeqCst);
    if !shared.closing.load(Ordering::SeqCst) {
        let _ = notify_tx.send(Notification::Lost).await;
    }
}

async fn wait_for_closing(shared: &Arc<Shared>) {
    loop {
        if shared.closing.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
