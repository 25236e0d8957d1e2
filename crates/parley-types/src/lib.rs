//! Shared types for the Parley voice pipeline.
//!
//! This crate holds the plain data that flows between the transcription
//! feed, the agent relay, and the client-facing stream. It carries no
//! behaviour beyond constructors and small conversions, so every other crate
//! in the workspace can depend on it without pulling in a runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

mod agent;
mod transcript;

pub use agent::AgentEvent;
pub use transcript::{LiveOptions, TranscriptEvent, TranscriptFragment};

/// Who an outbound message is attributed to on the client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Recognised speech from the connected user (partial or complete).
    User,
    /// Text produced by the conversational agent.
    Agent,
    /// A human-readable failure description.
    Error,
}

impl Role {
    /// Returns the SSE event name for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-tagged text unit destined for the client-facing stream.
///
/// Fields are private: a message is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    role: Role,
    text: String,
}

impl OutboundMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Role::Error, text)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// JSON body carried in the `data` field of the client stream record.
    pub fn data_json(&self) -> serde_json::Value {
        serde_json::json!({ "text": self.text })
    }
}

/// The `(session_id, user_id)` pair that identifies one conversation.
///
/// Used to resolve-or-create the agent session and to key each agent
/// invocation. Two live streams with the same identity are not serialized
/// against each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: String,
    pub user_id: String,
}

impl SessionIdentity {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}
