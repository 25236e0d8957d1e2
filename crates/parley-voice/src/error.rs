use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Audio input error: {0}")]
    Audio(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
