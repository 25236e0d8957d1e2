//! One client connection: transcript feed in, ordered messages out.
//!
//! A session starts the live transcription feed and the input source, then
//! runs two loops. The transcript handler task turns vendor events into
//! outbound messages, running the agent whenever an utterance completes. The
//! emit loop drains the outbound queue to the client, waking at least once per
//! poll interval to notice a disconnected client. Whatever ends the session,
//! cleanup runs exactly once and attempts every step.

use crate::accumulator::UtteranceAccumulator;
use crate::queue::{outbound_queue, OutboundReceiver, OutboundSender, Recv};
use async_trait::async_trait;
use futures_util::StreamExt;
use parley_types::{
    LiveOptions, OutboundMessage, SessionIdentity, TranscriptEvent, TranscriptFragment,
};
use parley_voice::{
    AgentEventRelay, AudioSource, AudioSourceFactory, SpeechSynthesisDispatcher,
    SpeechSynthesizer, Transcriber, TranscriptionConnection,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The client went away while a message was being delivered.
#[derive(Debug, Error)]
#[error("client transport is closed")]
pub struct TransportClosed;

/// Where a session's messages are delivered.
#[async_trait]
pub trait ClientTransport: Send {
    async fn emit(&mut self, message: &OutboundMessage) -> Result<(), TransportClosed>;

    /// Polled by the emit loop; never blocks.
    fn is_disconnected(&self) -> bool;
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Streaming,
    Draining,
    Closed,
}

/// Why a session stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The client disconnected.
    Disconnected,
    /// The transcription feed ended and every queued message was delivered.
    FeedEnded,
    /// The feed or input source could not be started.
    SetupFailed,
    /// The server is shutting down.
    Shutdown,
}

/// Summary returned once a session is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub reason: EndReason,
    pub delivered: usize,
}

/// Tunables shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_timeout: Duration,
    /// `None` for an unbounded outbound queue.
    pub queue_capacity: Option<usize>,
    pub live_options: LiveOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            queue_capacity: None,
            live_options: LiveOptions::default(),
        }
    }
}

/// Process-wide collaborators a session is composed from.
#[derive(Clone)]
pub struct SessionCollaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub audio: Arc<dyn AudioSourceFactory>,
    pub relay: AgentEventRelay,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// A single streaming session.
pub struct SessionStream {
    identity: SessionIdentity,
    collaborators: SessionCollaborators,
    settings: SessionSettings,
    state: SessionState,
    connection: Option<Box<dyn TranscriptionConnection>>,
    audio: Option<Box<dyn AudioSource>>,
    handler: Option<JoinHandle<()>>,
    shutdown: Option<watch::Receiver<bool>>,
    cleaned_up: bool,
}

impl SessionStream {
    pub fn new(
        identity: SessionIdentity,
        collaborators: SessionCollaborators,
        settings: SessionSettings,
    ) -> Self {
        Self {
            identity,
            collaborators,
            settings,
            state: SessionState::Streaming,
            connection: None,
            audio: None,
            handler: None,
            shutdown: None,
            cleaned_up: false,
        }
    }

    /// Ends the session once `shutdown` reads `true`, checked every poll
    /// interval like the client's disconnect flag.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion against `transport`.
    pub async fn run<T: ClientTransport>(mut self, mut transport: T) -> SessionReport {
        let (outbound_tx, mut outbound) = outbound_queue(self.settings.queue_capacity);

        if let Err(message) = self.start_feed(outbound_tx).await {
            self.state = SessionState::Draining;
            let delivered = match transport.emit(&message).await {
                Ok(()) => 1,
                Err(_) => 0,
            };
            self.cleanup().await;
            return SessionReport {
                reason: EndReason::SetupFailed,
                delivered,
            };
        }

        info!(identity = %self.identity, "session streaming");
        let (reason, delivered) = self.emit_loop(&mut outbound, &mut transport).await;

        self.state = SessionState::Draining;
        outbound.close();
        self.cleanup().await;

        info!(identity = %self.identity, ?reason, delivered, "session closed");
        SessionReport { reason, delivered }
    }

    /// Opens the transcription feed, starts the input source and spawns the
    /// transcript handler. On failure the returned message is for the client.
    async fn start_feed(&mut self, outbound: OutboundSender) -> Result<(), OutboundMessage> {
        let live = self
            .collaborators
            .transcriber
            .start(&self.settings.live_options)
            .await
            .map_err(|e| {
                warn!(identity = %self.identity, error = %e, "could not open transcription feed");
                OutboundMessage::error(e.to_string())
            })?;

        let sink = live.connection.audio_sink();
        self.connection = Some(live.connection);

        let mut audio = self.collaborators.audio.create();
        let started = audio.start(sink).await;
        self.audio = Some(audio);
        started.map_err(|e| {
            warn!(identity = %self.identity, error = %e, "could not start input source");
            OutboundMessage::error(e.to_string())
        })?;

        let handler = TranscriptHandler {
            identity: self.identity.clone(),
            accumulator: UtteranceAccumulator::new(),
            outbound,
            relay: self.collaborators.relay.clone(),
            speech: SpeechSynthesisDispatcher::new(self.collaborators.synthesizer.clone()),
        };
        self.handler = Some(tokio::spawn(handler.run(live.events)));
        Ok(())
    }

    async fn emit_loop<T: ClientTransport>(
        &mut self,
        outbound: &mut OutboundReceiver,
        transport: &mut T,
    ) -> (EndReason, usize) {
        let mut delivered = 0usize;
        loop {
            if transport.is_disconnected() {
                return (EndReason::Disconnected, delivered);
            }
            if self.shutting_down() {
                return (EndReason::Shutdown, delivered);
            }
            match outbound.recv_timeout(self.settings.poll_timeout).await {
                Recv::Message(message) => {
                    if transport.emit(&message).await.is_err() {
                        return (EndReason::Disconnected, delivered);
                    }
                    delivered += 1;
                }
                Recv::TimedOut => {}
                Recv::Closed => return (EndReason::FeedEnded, delivered),
            }
        }
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Releases the input source and the transcription connection.
    ///
    /// Runs at most once; each step is attempted even if an earlier one
    /// failed. Failures are logged, never returned.
    pub async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        if let Some(mut audio) = self.audio.take() {
            if audio.is_active() {
                if let Err(e) = audio.finish().await {
                    warn!(identity = %self.identity, error = %e, "cleanup: stopping input failed");
                }
            }
        }

        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.send_close().await {
                warn!(identity = %self.identity, error = %e, "cleanup: close signal failed");
            }
            if let Err(e) = connection.finish().await {
                warn!(identity = %self.identity, error = %e, "cleanup: closing connection failed");
            }
        }

        if let Some(handler) = self.handler.take() {
            handler.abort();
        }

        self.state = SessionState::Closed;
        debug!(identity = %self.identity, "session cleanup finished");
    }
}

/// Consumes transcript events for one session.
struct TranscriptHandler {
    identity: SessionIdentity,
    accumulator: UtteranceAccumulator,
    outbound: OutboundSender,
    relay: AgentEventRelay,
    speech: SpeechSynthesisDispatcher,
}

impl TranscriptHandler {
    async fn run(mut self, mut events: mpsc::Receiver<TranscriptEvent>) {
        while let Some(event) = events.recv().await {
            let delivered = match event {
                TranscriptEvent::Fragment(fragment) => self.on_fragment(fragment).await,
                TranscriptEvent::Error(description) => {
                    warn!(identity = %self.identity, error = %description, "transcription error");
                    self.push(OutboundMessage::error(description)).await
                }
            };
            if !delivered {
                debug!(identity = %self.identity, "outbound queue closed; handler stopping");
                return;
            }
        }
        debug!(identity = %self.identity, "transcription feed ended");
    }

    /// Returns false once the outbound queue is gone.
    async fn on_fragment(&mut self, fragment: TranscriptFragment) -> bool {
        self.accumulator.add_fragment(fragment.text.clone());

        if !fragment.is_final {
            return self.push(OutboundMessage::user(fragment.text)).await;
        }

        if !self.accumulator.is_complete(&fragment) {
            self.accumulator.discard();
            return true;
        }

        let utterance = self.accumulator.take_utterance();
        debug!(identity = %self.identity, len = utterance.len(), "utterance complete");
        if !self.push(OutboundMessage::user(utterance.clone())).await {
            return false;
        }

        let mut replies = Box::pin(self.relay.run(
            utterance,
            self.identity.clone(),
            self.speech.clone(),
        ));
        while let Some(message) = replies.next().await {
            if !self.push(message).await {
                return false;
            }
        }
        true
    }

    async fn push(&self, message: OutboundMessage) -> bool {
        self.outbound.push(message).await.is_ok()
    }
}
