//! Server configuration loading from file and environment variables.

use crate::session::SessionSettings;
use parley_voice::{AgentConfig, AudioConfig, SynthesisConfig, TranscriptionConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-session streaming settings.
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub audio: AudioConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Session streaming configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// How long the emit loop waits for a message before checking whether
    /// the client is still connected.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Outbound queue capacity; unbounded when absent.
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// Application name the agent's sessions are filed under.
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8002
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_app_name() -> String {
    "parley".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            queue_capacity: None,
            app_name: default_app_name(),
        }
    }
}

impl Config {
    /// Settings handed to every new session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            poll_timeout: Duration::from_millis(self.session.poll_timeout_ms.max(1)),
            queue_capacity: self.session.queue_capacity,
            live_options: self.transcription.live_options(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PARLEY_POLL_TIMEOUT_MS` overrides `session.poll_timeout_ms`
/// - `PARLEY_APP_NAME` overrides `session.app_name`
/// - `PARLEY_AGENT_URL` overrides `agent.url`
/// - `DEEPGRAM_API_KEY` sets `transcription.api_key`
/// - `ELEVEN_LABS_API_KEY` sets `synthesis.api_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("PARLEY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(ms) = var("PARLEY_POLL_TIMEOUT_MS") {
        if let Ok(parsed) = ms.parse() {
            config.session.poll_timeout_ms = parsed;
        }
    }
    if let Some(name) = var("PARLEY_APP_NAME") {
        config.session.app_name = name;
    }
    if let Some(url) = var("PARLEY_AGENT_URL") {
        config.agent.url = url;
    }
    if let Some(key) = var("DEEPGRAM_API_KEY") {
        config.transcription.api_key = key;
    }
    if let Some(key) = var("ELEVEN_LABS_API_KEY") {
        config.synthesis.api_key = key;
    }
}
