//! Per-session buffering of transcript fragments into utterances.

use parley_types::TranscriptFragment;

/// Fragments heard since the last utterance boundary.
///
/// One accumulator belongs to exactly one session; it is never shared.
#[derive(Debug, Default)]
pub struct UtteranceAccumulator {
    fragments: Vec<String>,
}

impl UtteranceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment's text, partial or final.
    pub fn add_fragment(&mut self, text: impl Into<String>) {
        self.fragments.push(text.into());
    }

    /// True when `fragment` marks an endpoint and something audible has been
    /// buffered.
    pub fn is_complete(&self, fragment: &TranscriptFragment) -> bool {
        fragment.is_final && !self.assembled().trim().is_empty()
    }

    /// Returns the buffered fragments joined by single spaces and clears the
    /// buffer.
    pub fn take_utterance(&mut self) -> String {
        let utterance = self.assembled();
        self.fragments.clear();
        utterance
    }

    /// Clears the buffer without producing an utterance.
    pub fn discard(&mut self) {
        self.fragments.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    fn assembled(&self) -> String {
        self.fragments.join(" ")
    }
}
