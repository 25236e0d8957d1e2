//! Voice collaborators for the Parley pipeline.
//!
//! Wraps the live transcription feed, the microphone input source, speech
//! synthesis and the conversational agent behind traits, and provides the
//! agent-facing half of a session: the [`AgentEventRelay`] and the
//! [`SpeechSynthesisDispatcher`] it schedules speech on.

pub mod agent;
pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod relay;
pub mod stt;
pub mod tts;

pub use agent::{
    decode_event_line, resolve_or_create, AgentEventStream, AgentRunner, AgentSession, AgentTurn,
    Closable, HttpAgentRunner, InMemorySessionStore, SessionStore,
};
pub use audio::{
    AudioSource, AudioSourceFactory, CommandAudioSource, CommandAudioSourceFactory, NoAudioSource,
};
pub use config::{AgentConfig, AudioConfig, SynthesisConfig, TranscriptionConfig};
pub use dispatch::{SpeechOutcome, SpeechSynthesisDispatcher};
pub use error::VoiceError;
pub use relay::AgentEventRelay;
pub use stt::{DeepgramTranscriber, LiveTranscription, Transcriber, TranscriptionConnection};
pub use tts::{ElevenLabsSynthesizer, MutedSynthesizer, SpeechSynthesizer};
