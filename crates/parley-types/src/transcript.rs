//! Transcript fragments and live decoding parameters.

use serde::{Deserialize, Serialize};

/// One incremental speech-recognition result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    /// Recognised text for this fragment. May be empty.
    pub text: String,
    /// Vendor-reported endpoint marker: the speaker finished an utterance.
    pub is_final: bool,
}

impl TranscriptFragment {
    pub fn new(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
        }
    }

    pub fn partial(text: impl Into<String>) -> Self {
        Self::new(text, false)
    }

    pub fn endpoint(text: impl Into<String>) -> Self {
        Self::new(text, true)
    }
}

/// An event delivered by the transcription feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Fragment(TranscriptFragment),
    /// Out-of-band vendor error. Non-fatal to the session.
    Error(String),
}

/// Decoding parameters sent when a live transcription connection starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveOptions {
    pub model: String,
    pub language: String,
    pub encoding: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub punctuate: bool,
    pub endpointing: bool,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            encoding: "linear16".to_string(),
            channels: 1,
            sample_rate: 16000,
            punctuate: true,
            endpointing: true,
        }
    }
}
