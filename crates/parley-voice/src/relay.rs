//! Turns one agent invocation into the session's outbound messages.

use crate::agent::{resolve_or_create, AgentRunner, AgentTurn, Closable, SessionStore};
use crate::dispatch::SpeechSynthesisDispatcher;
use futures_util::{Stream, StreamExt};
use parley_types::{OutboundMessage, SessionIdentity};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Drives agent invocations and relays their events in emission order.
///
/// Every agent event becomes exactly one `agent` message, and the same text
/// is scheduled for speech in the step that hands the message to the
/// consumer. Scheduling never waits on synthesis. A failed invocation yields one `error` message and ends the
/// stream. When the runner was composed with [`Closable`], it is released
/// after every invocation, including failed or abandoned ones.
#[derive(Clone)]
pub struct AgentEventRelay {
    runner: Arc<dyn AgentRunner>,
    store: Arc<dyn SessionStore>,
    closer: Option<Arc<dyn Closable>>,
    app_name: String,
}

impl AgentEventRelay {
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        store: Arc<dyn SessionStore>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            store,
            closer: None,
            app_name: app_name.into(),
        }
    }

    /// Composes a runner that also holds a resource to release per invocation.
    pub fn with_closable<R>(
        runner: Arc<R>,
        store: Arc<dyn SessionStore>,
        app_name: impl Into<String>,
    ) -> Self
    where
        R: AgentRunner + Closable + 'static,
    {
        let closer: Arc<dyn Closable> = runner.clone();
        Self {
            runner,
            store,
            closer: Some(closer),
            app_name: app_name.into(),
        }
    }

    /// Runs one turn for `identity`, yielding messages as the agent emits events.
    pub fn run(
        &self,
        utterance: String,
        identity: SessionIdentity,
        speech: SpeechSynthesisDispatcher,
    ) -> impl Stream<Item = OutboundMessage> + Send + 'static {
        let runner = self.runner.clone();
        let store = self.store.clone();
        let app_name = self.app_name.clone();
        let guard = ReleaseGuard {
            closer: self.closer.clone(),
        };

        async_stream::stream! {
            let guard = guard;
            let session = match resolve_or_create(store.as_ref(), &app_name, &identity).await {
                Ok(session) => session,
                Err(e) => {
                    error!(identity = %identity, error = %e, "could not resolve agent session");
                    yield OutboundMessage::error(agent_failure(&e));
                    guard.release().await;
                    return;
                }
            };

            let turn = AgentTurn { session, text: utterance };
            match runner.run(turn).await {
                Ok(mut events) => {
                    let mut relayed = 0usize;
                    while let Some(event) = events.next().await {
                        match event {
                            Ok(event) => {
                                let text = event.announcement();
                                // Queued in the poll that hands the message over,
                                // so a consumer that stops polling still hears it.
                                speech.schedule(text.clone());
                                relayed += 1;
                                yield OutboundMessage::agent(text);
                            }
                            Err(e) => {
                                error!(identity = %identity, error = %e, "agent run failed");
                                yield OutboundMessage::error(agent_failure(&e));
                                break;
                            }
                        }
                    }
                    debug!(identity = %identity, relayed, "agent turn finished");
                }
                Err(e) => {
                    error!(identity = %identity, error = %e, "agent run failed");
                    yield OutboundMessage::error(agent_failure(&e));
                }
            }

            guard.release().await;
        }
    }
}

fn agent_failure(e: &crate::VoiceError) -> String {
    format!("Agent Stopped Running {}", e)
}

/// Releases the runner's resource once, even if the stream is dropped early.
struct ReleaseGuard {
    closer: Option<Arc<dyn Closable>>,
}

impl ReleaseGuard {
    async fn release(mut self) {
        if let Some(closer) = self.closer.take() {
            close_logged(closer).await;
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(closer) = self.closer.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_logged(closer));
            }
            Err(_) => warn!("agent runner dropped outside a runtime; release skipped"),
        }
    }
}

async fn close_logged(closer: Arc<dyn Closable>) {
    if let Err(e) = closer.close().await {
        warn!(error = %e, "failed to release agent runner");
    }
}
