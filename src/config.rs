//! Configuration (§6.4): server bind address, upstream Realtime API
//! settings, and per-dialect/tunable knobs. Shape follows the teacher's
//! `toml`-file-plus-`.env`-secret-override pattern; fields are renamed
//! for this bridge's domain.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream OpenAI-style Realtime API connection (§6.4).
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Set from `OPENAI_API_KEY` if left blank in the file (§6.4).
    #[serde(default)]
    pub api_key: String,
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_modalities")]
    pub modalities: Vec<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Forwarded as a conversation item on bring-up before the opening
    /// response is requested (§4.5 step 4). Opaque content, same as
    /// `instructions` (§1) — absent means no greeting item is sent, the
    /// call still opens with a bare `response.create`.
    #[serde(default)]
    pub greeting_instructions: Option<String>,
    #[serde(default = "default_input_audio_format")]
    pub input_audio_format: String,
    #[serde(default = "default_output_audio_format")]
    pub output_audio_format: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_modalities() -> Vec<String> {
    vec!["audio".to_string(), "text".to_string()]
}

fn default_input_audio_format() -> String {
    "pcm16".to_string()
}

fn default_output_audio_format() -> String {
    "pcm16".to_string()
}

fn default_queue_capacity() -> usize {
    crate::realtime::queue::DEFAULT_CAPACITY
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_requests() -> usize {
    crate::realtime::rate_limit::MAX_REQUESTS
}

fn default_max_bytes() -> usize {
    crate::realtime::rate_limit::MAX_BYTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let env_path = config_dir().join(".env");
        match dotenvy::from_path(&env_path) {
            Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
            Err(dotenvy::Error::Io(_)) => {
                tracing::debug!(
                    "No .env file at {}, using environment only",
                    env_path.display()
                );
            }
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Failed to read config at {}: {}. Copy config.example.toml to {}",
                path.display(),
                e,
                path.display()
            )
        })?;

        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            config.upstream.api_key = v;
        }
        if let Ok(v) = std::env::var("VOICE_BRIDGE_HOST") {
            config.server.host = v;
        }
        if let Ok(v) = std::env::var("VOICE_BRIDGE_PORT") {
            if let Ok(port) = v.parse() {
                config.server.port = port;
            }
        }

        if config.upstream.api_key.is_empty() {
            return Err("upstream.api_key is not set (config file or OPENAI_API_KEY)".into());
        }

        Ok(config)
    }
}

fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("VOICE_BRIDGE_CONFIG") {
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".voice-bridge")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("VOICE_BRIDGE_CONFIG") {
        return PathBuf::from(p);
    }
    config_dir().join("config.toml")
}
