//! Conversational agent collaborator: session store and runners.

use crate::config::AgentConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parley_types::{AgentEvent, SessionIdentity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

/// Ordered events produced by one agent invocation.
pub type AgentEventStream = BoxStream<'static, Result<AgentEvent, VoiceError>>;

/// A conversation known to the agent's session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSession {
    pub app_name: String,
    pub identity: SessionIdentity,
    pub created_at: DateTime<Utc>,
}

/// One user turn submitted to the agent.
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub session: AgentSession,
    pub text: String,
}

/// Runs one agent turn and streams what the agent does.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, turn: AgentTurn) -> Result<AgentEventStream, VoiceError>;
}

/// Optional capability: a resource to release after every invocation.
#[async_trait]
pub trait Closable: Send + Sync {
    async fn close(&self) -> Result<(), VoiceError>;
}

/// Conversation sessions keyed by `(app_name, user_id, session_id)`.
///
/// Implementations are shared process-wide. Nothing here serializes two
/// turns issued concurrently against the same identity; callers must not do
/// that.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(
        &self,
        app_name: &str,
        identity: &SessionIdentity,
    ) -> Result<Option<AgentSession>, VoiceError>;

    async fn create_session(
        &self,
        app_name: &str,
        identity: &SessionIdentity,
    ) -> Result<AgentSession, VoiceError>;
}

/// Returns the existing session for `identity`, creating it on first use.
pub async fn resolve_or_create(
    store: &dyn SessionStore,
    app_name: &str,
    identity: &SessionIdentity,
) -> Result<AgentSession, VoiceError> {
    if let Some(session) = store.get_session(app_name, identity).await? {
        return Ok(session);
    }
    let session = store.create_session(app_name, identity).await?;
    info!(identity = %identity, app_name, "created agent session");
    Ok(session)
}

type SessionKey = (String, SessionIdentity);

/// Session store held in process memory; lost on restart.
///
/// Uses `std::sync::RwLock`: every lock is a brief map operation that never
/// spans an `.await`.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, AgentSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(
        &self,
        app_name: &str,
        identity: &SessionIdentity,
    ) -> Result<Option<AgentSession>, VoiceError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| VoiceError::SessionStore("session map lock poisoned".to_string()))?;
        Ok(sessions
            .get(&(app_name.to_string(), identity.clone()))
            .cloned())
    }

    async fn create_session(
        &self,
        app_name: &str,
        identity: &SessionIdentity,
    ) -> Result<AgentSession, VoiceError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| VoiceError::SessionStore("session map lock poisoned".to_string()))?;
        let session = sessions
            .entry((app_name.to_string(), identity.clone()))
            .or_insert_with(|| AgentSession {
                app_name: app_name.to_string(),
                identity: identity.clone(),
                created_at: Utc::now(),
            });
        Ok(session.clone())
    }
}

/// Request body sent to the remote agent for one turn.
#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    app_name: &'a str,
    session_id: &'a str,
    user_id: &'a str,
    text: &'a str,
}

/// Event line on the agent's newline-delimited JSON stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    ToolCall {
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    FinalAnswer {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Decodes one line of the agent event stream.
///
/// Blank lines and unrecognised event types yield `Ok(None)`.
pub fn decode_event_line(line: &str) -> Result<Option<AgentEvent>, VoiceError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let wire: WireEvent = serde_json::from_str(line)
        .map_err(|e| VoiceError::Agent(format!("malformed agent event: {}", e)))?;

    Ok(match wire {
        WireEvent::ToolCall { name, args } => {
            let argument = match args.get("query") {
                Some(serde_json::Value::String(q)) => q.clone(),
                Some(other) => other.to_string(),
                None => args.to_string(),
            };
            Some(AgentEvent::ToolInvocation {
                tool_name: name,
                argument,
            })
        }
        WireEvent::FinalAnswer { text } => Some(AgentEvent::FinalAnswer { text }),
        WireEvent::Other => None,
    })
}

/// Agent runner backed by an HTTP endpoint that streams NDJSON events.
#[derive(Debug, Clone)]
pub struct HttpAgentRunner {
    client: reqwest::Client,
    url: String,
}

impl HttpAgentRunner {
    pub fn new(config: &AgentConfig) -> Result<Self, VoiceError> {
        if config.url.trim().is_empty() {
            return Err(VoiceError::Config("agent.url must not be empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build agent client: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl AgentRunner for HttpAgentRunner {
    async fn run(&self, turn: AgentTurn) -> Result<AgentEventStream, VoiceError> {
        let identity = &turn.session.identity;
        let response = self
            .client
            .post(&self.url)
            .json(&RunRequest {
                app_name: &turn.session.app_name,
                session_id: &identity.session_id,
                user_id: &identity.user_id,
                text: &turn.text,
            })
            .send()
            .await
            .map_err(|e| VoiceError::Agent(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Agent(format!(
                "agent endpoint returned {}: {}",
                status, body
            )));
        }

        debug!(identity = %identity, "agent turn accepted");
        let mut bytes = response.bytes_stream();

        let events = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(VoiceError::Agent(e.to_string()));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match decode_event_line(&String::from_utf8_lossy(&line)) {
                        Ok(Some(event)) => yield Ok(event),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            match decode_event_line(&String::from_utf8_lossy(&buffer)) {
                Ok(Some(event)) => yield Ok(event),
                Ok(None) => {}
                Err(e) => yield Err(e),
            }
        };

        Ok(events.boxed())
    }
}
