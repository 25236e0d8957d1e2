//! Events observed during one agent invocation.

use serde::{Deserialize, Serialize};

/// An event emitted by the conversational agent while it handles a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The agent decided to call a tool before answering.
    ToolInvocation { tool_name: String, argument: String },
    /// The agent's answer for this turn.
    FinalAnswer { text: String },
}

impl AgentEvent {
    pub fn tool(tool_name: impl Into<String>, argument: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool_name: tool_name.into(),
            argument: argument.into(),
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self::FinalAnswer { text: text.into() }
    }

    /// Text announced to the user for this event.
    ///
    /// Tool invocations become a hold notice; final answers are spoken as-is.
    pub fn announcement(&self) -> String {
        match self {
            Self::ToolInvocation {
                tool_name,
                argument,
            } => format!("Calling tool {tool_name} with query {argument} Please Hold On!"),
            Self::FinalAnswer { text } => text.clone(),
        }
    }
}
