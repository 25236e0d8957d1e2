//! In-process fakes for session and API tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use parley_server::session::{
    ClientTransport, SessionCollaborators, SessionSettings, TransportClosed,
};
use parley_types::{AgentEvent, LiveOptions, OutboundMessage, TranscriptEvent};
use parley_voice::{
    AgentEventRelay, AgentEventStream, AgentRunner, AgentTurn, AudioSource, AudioSourceFactory,
    InMemorySessionStore, LiveTranscription, SpeechSynthesizer, Transcriber,
    TranscriptionConnection, VoiceError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Counts how often each cleanup step ran.
#[derive(Debug, Default)]
pub struct Counters {
    pub send_close: AtomicUsize,
    pub finish: AtomicUsize,
    pub audio_finish: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Transcriber whose single feed is driven by the test.
pub struct FakeTranscriber {
    feed: Mutex<Option<mpsc::Receiver<TranscriptEvent>>>,
    counters: Arc<Counters>,
    fail_close: bool,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn start(&self, _options: &LiveOptions) -> Result<LiveTranscription, VoiceError> {
        let events = self
            .feed
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| VoiceError::Transcription("Could not open socket".to_string()))?;
        let (audio_tx, _audio_rx) = mpsc::channel(8);
        Ok(LiveTranscription {
            connection: Box::new(FakeConnection {
                audio_tx,
                counters: self.counters.clone(),
                fail_close: self.fail_close,
            }),
            events,
        })
    }
}

struct FakeConnection {
    audio_tx: mpsc::Sender<Vec<u8>>,
    counters: Arc<Counters>,
    fail_close: bool,
}

#[async_trait]
impl TranscriptionConnection for FakeConnection {
    fn audio_sink(&self) -> mpsc::Sender<Vec<u8>> {
        self.audio_tx.clone()
    }

    async fn send_close(&mut self) -> Result<(), VoiceError> {
        self.counters.send_close.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(VoiceError::Transcription("socket already gone".to_string()));
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        self.counters.finish.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Input source that reports active until finished.
pub struct FakeAudioFactory {
    counters: Arc<Counters>,
}

impl AudioSourceFactory for FakeAudioFactory {
    fn create(&self) -> Box<dyn AudioSource> {
        Box::new(FakeAudio {
            active: false,
            counters: self.counters.clone(),
        })
    }
}

struct FakeAudio {
    active: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl AudioSource for FakeAudio {
    async fn start(&mut self, _sink: mpsc::Sender<Vec<u8>>) -> Result<(), VoiceError> {
        self.active = true;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        self.counters.audio_finish.fetch_add(1, Ordering::SeqCst);
        self.active = false;
        Ok(())
    }
}

type Script = Box<dyn Fn(&str) -> Vec<Result<AgentEvent, String>> + Send + Sync>;

/// Agent that answers each utterance from a script and records what it heard.
pub struct ScriptedAgent {
    script: Script,
    pub heard: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str) -> Vec<Result<AgentEvent, String>> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            heard: Mutex::new(Vec::new()),
        }
    }

    pub fn heard(&self) -> Vec<String> {
        self.heard.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn run(&self, turn: AgentTurn) -> Result<AgentEventStream, VoiceError> {
        self.heard.lock().unwrap().push(turn.text.clone());
        let events: Vec<Result<AgentEvent, VoiceError>> = (self.script)(&turn.text)
            .into_iter()
            .map(|r| r.map_err(VoiceError::Agent))
            .collect();
        Ok(stream::iter(events).boxed())
    }
}

/// Records spoken text; fails for any text containing `fail_on`.
#[derive(Default)]
pub struct RecordingSynth {
    pub fail_on: Option<String>,
    pub spoken: Mutex<Vec<String>>,
}

impl RecordingSynth {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechSynthesizer for RecordingSynth {
    fn synthesize_and_play(&self, text: &str) -> Result<(), VoiceError> {
        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                return Err(VoiceError::Synthesis("Audio Stream broken".to_string()));
            }
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Client transport that records deliveries and disconnects on demand.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub delivered: Arc<Mutex<Vec<OutboundMessage>>>,
    pub disconnected: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClientTransport for RecordingTransport {
    async fn emit(&mut self, message: &OutboundMessage) -> Result<(), TransportClosed> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(TransportClosed);
        }
        self.delivered.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

/// Everything a test needs to drive one session.
pub struct Harness {
    pub collaborators: SessionCollaborators,
    pub feed: mpsc::Sender<TranscriptEvent>,
    pub counters: Arc<Counters>,
    pub agent: Arc<ScriptedAgent>,
    pub synth: Arc<RecordingSynth>,
}

pub struct HarnessBuilder {
    agent: ScriptedAgent,
    synth: RecordingSynth,
    transcriber_fails: bool,
    fail_close: bool,
}

impl HarnessBuilder {
    pub fn new(agent: ScriptedAgent) -> Self {
        Self {
            agent,
            synth: RecordingSynth::default(),
            transcriber_fails: false,
            fail_close: false,
        }
    }

    pub fn synth(mut self, synth: RecordingSynth) -> Self {
        self.synth = synth;
        self
    }

    pub fn transcriber_fails(mut self) -> Self {
        self.transcriber_fails = true;
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn build(self) -> Harness {
        let counters = Arc::new(Counters::default());
        let (feed, events) = mpsc::channel(32);
        let transcriber = FakeTranscriber {
            feed: Mutex::new((!self.transcriber_fails).then_some(events)),
            counters: counters.clone(),
            fail_close: self.fail_close,
        };
        let agent = Arc::new(self.agent);
        let synth = Arc::new(self.synth);
        let relay = AgentEventRelay::new(
            agent.clone(),
            Arc::new(InMemorySessionStore::new()),
            "parley-test",
        );

        Harness {
            collaborators: SessionCollaborators {
                transcriber: Arc::new(transcriber),
                audio: Arc::new(FakeAudioFactory {
                    counters: counters.clone(),
                }),
                relay,
                synthesizer: synth.clone(),
            },
            feed,
            counters,
            agent,
            synth,
        }
    }
}

pub fn settings(poll: Duration) -> SessionSettings {
    SessionSettings {
        poll_timeout: poll,
        ..SessionSettings::default()
    }
}

pub fn fragment(text: &str, is_final: bool) -> TranscriptEvent {
    TranscriptEvent::Fragment(parley_types::TranscriptFragment::new(text, is_final))
}

/// Polls `check` on real time until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
