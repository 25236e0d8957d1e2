//! Offloads blocking speech synthesis away from the session's event loop.

use crate::tts::SpeechSynthesizer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Result of one synthesis attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    Spoken,
    Failed(String),
}

/// Runs synthesis on the blocking thread pool.
///
/// [`speak`](Self::speak) awaits a single synthesis. [`schedule`](Self::schedule)
/// hands text to a detached worker that speaks requests one at a time, in
/// the order they were scheduled, and logs failures instead of returning
/// them. The worker drains whatever is queued and exits once every handle
/// has been dropped.
#[derive(Clone)]
pub struct SpeechSynthesisDispatcher {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    queue: mpsc::UnboundedSender<String>,
}

impl SpeechSynthesisDispatcher {
    /// Creates a dispatcher and spawns its worker on the current runtime.
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        let (queue, mut pending) = mpsc::unbounded_channel::<String>();
        let worker_synth = synthesizer.clone();

        tokio::spawn(async move {
            while let Some(text) = pending.recv().await {
                if let SpeechOutcome::Failed(reason) = speak_on(&worker_synth, text).await {
                    warn!(error = %reason, "speech synthesis failed");
                }
            }
            debug!("speech synthesis worker exited");
        });

        Self { synthesizer, queue }
    }

    /// Synthesizes and plays `text`, returning when playback finishes.
    pub async fn speak(&self, text: impl Into<String>) -> SpeechOutcome {
        speak_on(&self.synthesizer, text.into()).await
    }

    /// Queues `text` for the worker and returns immediately.
    pub fn schedule(&self, text: impl Into<String>) {
        if self.queue.send(text.into()).is_err() {
            warn!("speech synthesis worker is gone; dropping request");
        }
    }
}

async fn speak_on(synthesizer: &Arc<dyn SpeechSynthesizer>, text: String) -> SpeechOutcome {
    let synthesizer = synthesizer.clone();
    match tokio::task::spawn_blocking(move || synthesizer.synthesize_and_play(&text)).await {
        Ok(Ok(())) => SpeechOutcome::Spoken,
        Ok(Err(e)) => SpeechOutcome::Failed(e.to_string()),
        Err(e) => SpeechOutcome::Failed(format!("synthesis task join error: {}", e)),
    }
}
