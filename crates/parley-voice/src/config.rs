use parley_types::LiveOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_listen_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_model() -> String {
    "nova-2".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_encoding() -> String {
    "linear16".to_string()
}

fn default_channels() -> u16 {
    1
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_true() -> bool {
    true
}

fn default_keepalive_interval_secs() -> u64 {
    5
}

/// Live transcription vendor settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_listen_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_true")]
    pub punctuate: bool,
    #[serde(default = "default_true")]
    pub endpointing: bool,
    /// Send periodic keepalive frames so the vendor does not drop an idle socket.
    #[serde(default = "default_true")]
    pub keepalive: bool,
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: default_listen_url(),
            model: default_model(),
            language: default_language(),
            encoding: default_encoding(),
            channels: default_channels(),
            sample_rate: default_sample_rate(),
            punctuate: true,
            endpointing: true,
            keepalive: true,
            keepalive_interval_secs: default_keepalive_interval_secs(),
        }
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("api_key", &"[REDACTED]")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("language", &self.language)
            .field("encoding", &self.encoding)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("punctuate", &self.punctuate)
            .field("endpointing", &self.endpointing)
            .field("keepalive", &self.keepalive)
            .finish()
    }
}

impl TranscriptionConfig {
    /// Decoding parameters sent when a live connection starts.
    pub fn live_options(&self) -> LiveOptions {
        LiveOptions {
            model: self.model.clone(),
            language: self.language.clone(),
            encoding: self.encoding.clone(),
            channels: self.channels,
            sample_rate: self.sample_rate,
            punctuate: self.punctuate,
            endpointing: self.endpointing,
        }
    }
}

fn default_synthesis_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_voice_id() -> String {
    "XrExE9yKIg1WjnnlVkGX".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_player() -> Vec<String> {
    ["mpv", "--no-cache", "--no-terminal", "--", "fd://0"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Text-to-speech vendor and local playback settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// When false, synthesis requests are accepted and dropped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_synthesis_url")]
    pub base_url: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Player command that reads encoded audio from stdin.
    #[serde(default = "default_player")]
    pub player: Vec<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            base_url: default_synthesis_url(),
            voice_id: default_voice_id(),
            model_id: default_model_id(),
            player: default_player(),
        }
    }
}

impl fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("player", &self.player)
            .finish()
    }
}

fn default_agent_url() -> String {
    "http://127.0.0.1:8003/run".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    120
}

/// Remote agent endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_url")]
    pub url: String,
    /// Upper bound on one whole agent turn, stream included.
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: default_agent_url(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

fn default_capture_command() -> Vec<String> {
    [
        "arecord", "-q", "-f", "S16_LE", "-r", "16000", "-c", "1", "-t", "raw",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_chunk_bytes() -> usize {
    // 100ms of 16kHz mono s16le
    3200
}

/// Input source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture command writing raw PCM to stdout.
    #[serde(default = "default_capture_command")]
    pub command: Vec<String>,
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            command: default_capture_command(),
            chunk_bytes: default_chunk_bytes(),
        }
    }
}
