//! Input sources that feed raw PCM into a live transcription connection.

use crate::config::AudioConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Timeout for the capture process to exit after being killed.
const CAPTURE_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// A microphone or equivalent audio input.
#[async_trait]
pub trait AudioSource: Send {
    /// Starts capturing, forwarding chunks to `sink` until finished.
    async fn start(&mut self, sink: mpsc::Sender<Vec<u8>>) -> Result<(), VoiceError>;

    fn is_active(&self) -> bool;

    /// Stops capturing. Calling it on an inactive source is a no-op.
    async fn finish(&mut self) -> Result<(), VoiceError>;
}

/// Creates one input source per session.
pub trait AudioSourceFactory: Send + Sync {
    fn create(&self) -> Box<dyn AudioSource>;
}

/// Captures audio by running an external recorder and reading its stdout.
#[derive(Debug)]
pub struct CommandAudioSource {
    program: String,
    args: Vec<String>,
    chunk_bytes: usize,
    child: Option<Child>,
    pump: Option<JoinHandle<()>>,
    active: Arc<AtomicBool>,
}

impl CommandAudioSource {
    pub fn new(config: &AudioConfig) -> Result<Self, VoiceError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| VoiceError::Config("audio.command must not be empty".to_string()))?;
        if config.chunk_bytes == 0 {
            return Err(VoiceError::Config(
                "audio.chunk_bytes must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            chunk_bytes: config.chunk_bytes,
            child: None,
            pump: None,
            active: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl AudioSource for CommandAudioSource {
    async fn start(&mut self, sink: mpsc::Sender<Vec<u8>>) -> Result<(), VoiceError> {
        if self.is_active() {
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Audio(format!("Failed to spawn {}: {}", self.program, e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoiceError::Audio("Failed to open capture stdout".to_string()))?;

        let active = self.active.clone();
        active.store(true, Ordering::SeqCst);
        let chunk_bytes = self.chunk_bytes;

        let pump = tokio::spawn(async move {
            let mut buf = vec![0u8; chunk_bytes];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        debug!("audio capture reached end of stream");
                        break;
                    }
                    Ok(n) => {
                        if sink.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("audio capture read failed: {}", e);
                        break;
                    }
                }
            }
            active.store(false, Ordering::SeqCst);
        });

        info!(program = %self.program, "audio capture started");
        self.child = Some(child);
        self.pump = Some(pump);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.child.is_some() && self.active.load(Ordering::SeqCst)
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        self.active.store(false, Ordering::SeqCst);
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }

        child
            .start_kill()
            .map_err(|e| VoiceError::Audio(format!("Failed to stop capture: {}", e)))?;
        tokio::time::timeout(CAPTURE_EXIT_TIMEOUT, child.wait())
            .await
            .map_err(|_| {
                VoiceError::Audio(format!(
                    "capture process did not exit within {} seconds",
                    CAPTURE_EXIT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Audio(format!("Failed to reap capture process: {}", e)))?;

        info!(program = %self.program, "audio capture stopped");
        Ok(())
    }
}

/// Builds a [`CommandAudioSource`] from shared configuration for each session.
#[derive(Debug, Clone)]
pub struct CommandAudioSourceFactory {
    config: AudioConfig,
}

impl CommandAudioSourceFactory {
    pub fn new(config: AudioConfig) -> Result<Self, VoiceError> {
        // Validate once up front so per-session construction cannot fail.
        CommandAudioSource::new(&config)?;
        Ok(Self { config })
    }
}

impl AudioSourceFactory for CommandAudioSourceFactory {
    fn create(&self) -> Box<dyn AudioSource> {
        match CommandAudioSource::new(&self.config) {
            Ok(source) => Box::new(source),
            Err(e) => {
                warn!("audio source unavailable: {}", e);
                Box::new(NoAudioSource)
            }
        }
    }
}

/// Input source that never produces audio.
///
/// Used when audio reaches the transcription vendor by some other path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudioSource;

#[async_trait]
impl AudioSource for NoAudioSource {
    async fn start(&mut self, _sink: mpsc::Sender<Vec<u8>>) -> Result<(), VoiceError> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        Ok(())
    }
}

impl AudioSourceFactory for NoAudioSource {
    fn create(&self) -> Box<dyn AudioSource> {
        Box::new(NoAudioSource)
    }
}
