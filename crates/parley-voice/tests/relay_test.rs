use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use parley_types::{AgentEvent, OutboundMessage, Role, SessionIdentity};
use parley_voice::{
    AgentEventRelay, AgentEventStream, AgentRunner, AgentSession, AgentTurn, Closable,
    InMemorySessionStore, SessionStore, SpeechSynthesisDispatcher, SpeechSynthesizer, VoiceError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Agent that replays a fixed script and records the turns it received.
struct ScriptedAgent {
    script: Vec<Result<AgentEvent, String>>,
    fail_to_start: bool,
    turns: Mutex<Vec<AgentTurn>>,
    closed: AtomicUsize,
}

impl ScriptedAgent {
    fn new(script: Vec<Result<AgentEvent, String>>) -> Self {
        Self {
            script,
            fail_to_start: false,
            turns: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail_to_start: true,
            ..Self::new(vec![])
        }
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn run(&self, turn: AgentTurn) -> Result<AgentEventStream, VoiceError> {
        self.turns.lock().unwrap().push(turn);
        if self.fail_to_start {
            return Err(VoiceError::Agent("model unavailable".to_string()));
        }
        let events: Vec<Result<AgentEvent, VoiceError>> = self
            .script
            .iter()
            .cloned()
            .map(|r| r.map_err(VoiceError::Agent))
            .collect();
        Ok(stream::iter(events).boxed())
    }
}

#[async_trait]
impl Closable for ScriptedAgent {
    async fn close(&self) -> Result<(), VoiceError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSynth {
    spoken: Mutex<Vec<String>>,
}

impl SpeechSynthesizer for RecordingSynth {
    fn synthesize_and_play(&self, text: &str) -> Result<(), VoiceError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct BrokenStore;

#[async_trait]
impl SessionStore for BrokenStore {
    async fn get_session(
        &self,
        _app_name: &str,
        _identity: &SessionIdentity,
    ) -> Result<Option<AgentSession>, VoiceError> {
        Err(VoiceError::SessionStore("store offline".to_string()))
    }

    async fn create_session(
        &self,
        _app_name: &str,
        _identity: &SessionIdentity,
    ) -> Result<AgentSession, VoiceError> {
        Err(VoiceError::SessionStore("store offline".to_string()))
    }
}

async fn wait_for_speech(synth: &RecordingSynth, count: usize) -> Vec<String> {
    for _ in 0..200 {
        if synth.spoken.lock().unwrap().len() >= count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    synth.spoken.lock().unwrap().clone()
}

fn identity() -> SessionIdentity {
    SessionIdentity::new("session-1", "user-1")
}

#[tokio::test]
async fn relays_every_event_in_order_and_speaks_it() {
    let agent = Arc::new(ScriptedAgent::new(vec![
        Ok(AgentEvent::tool("search", "cats")),
        Ok(AgentEvent::answer("Cats are great.")),
    ]));
    let store = Arc::new(InMemorySessionStore::new());
    let relay = AgentEventRelay::new(agent.clone(), store.clone(), "parley");
    let synth = Arc::new(RecordingSynth::default());
    let speech = SpeechSynthesisDispatcher::new(synth.clone());

    let messages: Vec<OutboundMessage> = relay
        .run("tell me about cats".to_string(), identity(), speech)
        .collect()
        .await;

    assert_eq!(
        messages,
        vec![
            OutboundMessage::agent("Calling tool search with query cats Please Hold On!"),
            OutboundMessage::agent("Cats are great."),
        ]
    );

    let spoken = wait_for_speech(&synth, 2).await;
    assert_eq!(
        spoken,
        vec![
            "Calling tool search with query cats Please Hold On!".to_string(),
            "Cats are great.".to_string(),
        ]
    );

    let turns = agent.turns.lock().unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].text, "tell me about cats");
    assert_eq!(turns[0].session.identity, identity());
    assert_eq!(turns[0].session.app_name, "parley");
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn failure_mid_stream_emits_one_error_and_stops() {
    let agent = Arc::new(ScriptedAgent::new(vec![
        Ok(AgentEvent::tool("search", "dogs")),
        Err("tool crashed".to_string()),
        Ok(AgentEvent::answer("never relayed")),
    ]));
    let relay = AgentEventRelay::new(agent, Arc::new(InMemorySessionStore::new()), "parley");
    let speech = SpeechSynthesisDispatcher::new(Arc::new(RecordingSynth::default()));

    let messages: Vec<OutboundMessage> = relay
        .run("dogs?".to_string(), identity(), speech)
        .collect()
        .await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role(), Role::Agent);
    assert_eq!(messages[1].role(), Role::Error);
    assert!(messages[1].text().starts_with("Agent Stopped Running"));
    assert!(messages[1].text().contains("tool crashed"));
}

#[tokio::test]
async fn runner_that_fails_to_start_yields_single_error() {
    let agent = Arc::new(ScriptedAgent::failing());
    let relay = AgentEventRelay::with_closable(
        agent.clone(),
        Arc::new(InMemorySessionStore::new()),
        "parley",
    );
    let speech = SpeechSynthesisDispatcher::new(Arc::new(RecordingSynth::default()));

    let messages: Vec<OutboundMessage> = relay
        .run("hello".to_string(), identity(), speech)
        .collect()
        .await;

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role(), Role::Error);
    assert!(messages[0].text().contains("model unavailable"));
    assert_eq!(agent.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closable_runner_is_released_after_each_turn() {
    let agent = Arc::new(ScriptedAgent::new(vec![Ok(AgentEvent::answer("ok"))]));
    let relay = AgentEventRelay::with_closable(
        agent.clone(),
        Arc::new(InMemorySessionStore::new()),
        "parley",
    );
    let speech = SpeechSynthesisDispatcher::new(Arc::new(RecordingSynth::default()));

    for _ in 0..2 {
        let _: Vec<OutboundMessage> = relay
            .run("hi".to_string(), identity(), speech.clone())
            .collect()
            .await;
    }
    assert_eq!(agent.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn abandoned_turn_still_releases_runner() {
    let agent = Arc::new(ScriptedAgent::new(vec![
        Ok(AgentEvent::answer("first")),
        Ok(AgentEvent::answer("second")),
    ]));
    let relay = AgentEventRelay::with_closable(
        agent.clone(),
        Arc::new(InMemorySessionStore::new()),
        "parley",
    );
    let speech = SpeechSynthesisDispatcher::new(Arc::new(RecordingSynth::default()));

    {
        let mut messages = Box::pin(relay.run("hi".to_string(), identity(), speech));
        assert_eq!(messages.next().await, Some(OutboundMessage::agent("first")));
    }

    for _ in 0..100 {
        if agent.closed.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(agent.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn last_message_taken_is_spoken_even_if_stream_is_dropped() {
    let agent = Arc::new(ScriptedAgent::new(vec![
        Ok(AgentEvent::answer("first")),
        Ok(AgentEvent::answer("second")),
    ]));
    let relay = AgentEventRelay::new(agent, Arc::new(InMemorySessionStore::new()), "parley");
    let synth = Arc::new(RecordingSynth::default());
    let speech = SpeechSynthesisDispatcher::new(synth.clone());

    {
        let mut messages = Box::pin(relay.run("hi".to_string(), identity(), speech));
        assert_eq!(messages.next().await, Some(OutboundMessage::agent("first")));
    }

    assert_eq!(wait_for_speech(&synth, 1).await, vec!["first".to_string()]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(synth.spoken.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn session_store_failure_is_reported_without_running_agent() {
    let agent = Arc::new(ScriptedAgent::new(vec![Ok(AgentEvent::answer("unused"))]));
    let relay = AgentEventRelay::new(agent.clone(), Arc::new(BrokenStore), "parley");
    let speech = SpeechSynthesisDispatcher::new(Arc::new(RecordingSynth::default()));

    let messages: Vec<OutboundMessage> = relay
        .run("hi".to_string(), identity(), speech)
        .collect()
        .await;

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role(), Role::Error);
    assert!(messages[0].text().contains("store offline"));
    assert!(agent.turns.lock().unwrap().is_empty());
}
