//! Text-to-speech synthesis and local playback.
//!
//! Synthesizers are blocking: one call covers the vendor request and playing
//! the returned audio to completion. Callers on the async side go through
//! [`crate::SpeechSynthesisDispatcher`].

use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;

/// Maximum text input size for one synthesis request.
const MAX_TTS_INPUT_BYTES: usize = 5000;

/// Timeout for reaching the vendor.
const TTS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for the whole request. The body is read at playback speed through
/// the player's pipe, so this bounds the longest speakable input, not latency.
const TTS_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Blocking synthesis plus playback of one text.
pub trait SpeechSynthesizer: Send + Sync + 'static {
    fn synthesize_and_play(&self, text: &str) -> Result<(), VoiceError>;
}

/// Rejects text that is too large to send to a synthesis vendor.
fn check_input(text: &str) -> Result<(), VoiceError> {
    if text.len() > MAX_TTS_INPUT_BYTES {
        return Err(VoiceError::Synthesis(format!(
            "text exceeds maximum size: {} bytes (limit: {} bytes)",
            text.len(),
            MAX_TTS_INPUT_BYTES
        )));
    }
    Ok(())
}

/// ElevenLabs streaming synthesis piped into a local player process.
#[derive(Debug, Clone)]
pub struct ElevenLabsSynthesizer {
    config: SynthesisConfig,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: SynthesisConfig) -> Result<Self, VoiceError> {
        if config.api_key.is_empty() {
            return Err(VoiceError::Config(
                "synthesis api_key is not configured (set ELEVEN_LABS_API_KEY)".to_string(),
            ));
        }
        if config.player.is_empty() {
            return Err(VoiceError::Config(
                "synthesis.player must not be empty".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        )
    }

    fn spawn_player(&self) -> Result<std::process::Child, VoiceError> {
        let (program, args) = self
            .config
            .player
            .split_first()
            .ok_or_else(|| VoiceError::Config("synthesis.player must not be empty".to_string()))?;

        Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoiceError::Synthesis(format!("Failed to spawn player {}: {}", program, e)))
    }
}

impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn synthesize_and_play(&self, text: &str) -> Result<(), VoiceError> {
        check_input(text)?;
        if text.trim().is_empty() {
            return Ok(());
        }

        // Built per call: a blocking client must be created and dropped off the
        // async runtime, and this method only ever runs on a blocking thread.
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(TTS_CONNECT_TIMEOUT)
            .timeout(TTS_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Synthesis(format!("Failed to build client: {}", e)))?;

        let mut response = client
            .post(self.stream_url())
            .header("xi-api-key", &self.config.api_key)
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.config.model_id,
            }))
            .send()
            .map_err(|e| VoiceError::Synthesis(format!("Audio Stream broken {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "synthesis request failed with {}: {}",
                status, body
            )));
        }

        let mut player = self.spawn_player()?;
        let mut stdin = player
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Synthesis("Failed to open player stdin".to_string()))?;

        let copied = std::io::copy(&mut response, &mut stdin)
            .and_then(|n| stdin.flush().map(|_| n));
        drop(stdin); // EOF lets the player finish

        let status = player
            .wait()
            .map_err(|e| VoiceError::Synthesis(format!("Failed to wait for player: {}", e)))?;

        let bytes = copied
            .map_err(|e| VoiceError::Synthesis(format!("Audio Stream broken {}", e)))?;
        if !status.success() {
            return Err(VoiceError::Synthesis(format!(
                "player exited with {}",
                status
            )));
        }

        debug!(bytes, "synthesized audio played");
        Ok(())
    }
}

/// Accepts every request and plays nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct MutedSynthesizer;

impl SpeechSynthesizer for MutedSynthesizer {
    fn synthesize_and_play(&self, text: &str) -> Result<(), VoiceError> {
        check_input(text)?;
        debug!(len = text.len(), "synthesis muted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> SynthesisConfig {
        SynthesisConfig {
            api_key: "xi-test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn request_budget_covers_longest_input_at_playback_speed() {
        // Slow speech runs around ten characters per second.
        let longest_playback = Duration::from_secs((MAX_TTS_INPUT_BYTES / 10) as u64);
        assert!(TTS_REQUEST_TIMEOUT >= longest_playback);
        assert!(TTS_CONNECT_TIMEOUT < TTS_REQUEST_TIMEOUT);
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let result = ElevenLabsSynthesizer::new(SynthesisConfig::default());
        assert!(matches!(result, Err(VoiceError::Config(_))));
    }

    #[test]
    fn empty_player_is_a_config_error() {
        let config = SynthesisConfig {
            player: vec![],
            ..configured()
        };
        assert!(matches!(
            ElevenLabsSynthesizer::new(config),
            Err(VoiceError::Config(_))
        ));
    }

    #[test]
    fn stream_url_uses_voice_id() {
        let config = SynthesisConfig {
            base_url: "https://tts.example.com/".to_string(),
            voice_id: "voice-9".to_string(),
            ..configured()
        };
        let synth = ElevenLabsSynthesizer::new(config).unwrap();
        assert_eq!(
            synth.stream_url(),
            "https://tts.example.com/v1/text-to-speech/voice-9/stream"
        );
    }

    #[test]
    fn oversized_text_is_rejected_before_any_request() {
        let synth = ElevenLabsSynthesizer::new(configured()).unwrap();
        let text = "a".repeat(MAX_TTS_INPUT_BYTES + 1);
        match synth.synthesize_and_play(&text) {
            Err(VoiceError::Synthesis(msg)) => assert!(msg.contains("exceeds maximum size")),
            other => panic!("expected Synthesis error, got {:?}", other),
        }
    }

    #[test]
    fn blank_text_is_a_no_op() {
        let synth = ElevenLabsSynthesizer::new(configured()).unwrap();
        assert!(synth.synthesize_and_play("   ").is_ok());
    }

    #[test]
    fn muted_synthesizer_accepts_text() {
        assert!(MutedSynthesizer.synthesize_and_play("hello").is_ok());
    }
}
