//! Typed wire events carried by `data:` frames

use serde::{Deserialize, Serialize};

/// One event emitted by the chat backend while streaming a turn
///
/// Payloads are JSON objects discriminated by `type`. The backend names the
/// tool under `tool` on lifecycle events, so `name` also accepts that key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Append `content` to the assistant reply
    Token {
        /// Text fragment
        content: String,
    },
    /// A tool invocation began
    ToolStart {
        /// Tool name
        #[serde(alias = "tool")]
        name: String,
    },
    /// A tool invocation finished successfully
    ToolEnd {
        /// Tool name
        #[serde(alias = "tool")]
        name: String,
    },
    /// Retrieval provenance for a tool
    Source {
        /// Tool the citations belong to
        #[serde(alias = "tool")]
        name: String,
        /// Cited documents
        #[serde(default)]
        citations: Vec<String>,
    },
    /// The server renamed a chat
    TitleUpdate {
        /// Renamed chat
        chat_id: String,
        /// New title
        title: String,
    },
    /// The turn failed; `content` is user-facing
    Error {
        /// Failure text
        #[serde(default)]
        content: String,
    },
    /// The turn finished normally
    Done,
}

impl ChatEvent {
    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::Source { .. } => "source",
            Self::TitleUpdate { .. } => "title_update",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }

    /// Returns true for events that end the turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done)
    }
}
