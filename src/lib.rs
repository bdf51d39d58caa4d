//! Library surface for `realtime-voice-bridge`. `src/main.rs` is a thin
//! binary wrapper around [`server`]; everything else lives here so
//! integration tests under `tests/` can dial the Bridge Orchestrator and
//! the Event Router directly instead of going through a real socket.

pub mod audio;
pub mod audiocodes;
pub mod config;
pub mod error;
pub mod mock;
pub mod orchestrator;
pub mod protocol;
pub mod realtime;
pub mod session;
pub mod twilio;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use config::Config;
use realtime::client::RealtimeConfig;

/// Shared application state accessible from all WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
}

impl AppState {
    /// Build a fresh `RealtimeConfig` for one call from the static
    /// upstream settings (§6.4).
    pub fn realtime_config(&self) -> RealtimeConfig {
        let upstream = &self.config.upstream;
        RealtimeConfig {
            host: upstream.host.clone(),
            model: upstream.model.clone(),
            api_key: upstream.api_key.clone(),
            session: protocol::realtime::SessionConfig {
                modalities: upstream.modalities.clone(),
                voice: Some(upstream.voice.clone()),
                instructions: upstream.instructions.clone(),
                input_audio_format: Some(upstream.input_audio_format.clone()),
                output_audio_format: Some(upstream.output_audio_format.clone()),
                ..Default::default()
            },
            heartbeat_interval: std::time::Duration::from_secs(upstream.heartbeat_interval_secs),
            queue_capacity: upstream.queue_capacity,
            insecure: false,
        }
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_voice_bridge=info,tower_http=info".into()),
        )
        .init();
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/audiocodes/ws", get(audiocodes::media::handle_ws_upgrade))
        .route("/twilio/media", get(twilio::media::handle_media_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn server() {
    init_tracing();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        upstream_host = %config.upstream.host,
        "Starting realtime-voice-bridge"
    );

    let state = AppState { config };
    let server_host = state.config.server.host.clone();
    let server_port = state.config.server.port;
    let app = build_router(state);

    let addr: SocketAddr = format!("{server_host}:{server_port}")
        .parse()
        .expect("Invalid server address");

    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server error");
}
