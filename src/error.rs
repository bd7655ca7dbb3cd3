//! Error types for Chatline
//!
//! This module defines the error types used throughout the client engine,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Fallback text surfaced when a send fails without a usable server message
pub const GENERIC_SEND_FAILURE: &str = "Something went wrong while sending your message.";

/// Main error type for Chatline operations
///
/// Covers configuration loading, the HTTP request surface, session
/// bookkeeping, and local attachment handling.
#[derive(Error, Debug)]
pub enum ChatlineError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend rejected the bearer token (HTTP 401)
    #[error("Unauthorized: the chat service rejected the current credentials")]
    Unauthorized,

    /// Non-success HTTP response carrying a user-facing message
    #[error("Chat service returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message extracted from the response body
        message: String,
    },

    /// The request never produced a response, or the body stream broke
    #[error("Transport error: {0}")]
    Transport(String),

    /// A turn is already streaming in the active session
    #[error("A reply is still streaming for chat {0}")]
    TurnInProgress(String),

    /// The chat was switched away while the operation was in flight
    #[error("Chat {0} was replaced by another session")]
    SessionSuperseded(String),

    /// The operation needs a selected chat
    #[error("No chat is currently selected")]
    NoActiveChat,

    /// Local attachment could not be prepared
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ChatlineError {
    /// Text shown to the user as the content of a failed turn
    ///
    /// Server-provided messages are surfaced verbatim; everything else
    /// collapses to a generic sentence.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatline::error::ChatlineError;
    ///
    /// let error = ChatlineError::Api { status: 400, message: "Message content is required".into() };
    /// assert_eq!(error.user_message(), "Message content is required");
    /// ```
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
            Self::TurnInProgress(_) => "Please wait for the current reply to finish.".to_string(),
            _ => GENERIC_SEND_FAILURE.to_string(),
        }
    }

    /// Returns true when the error means the credentials are no longer valid
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Extract the user-facing message from any error produced by this crate
///
/// Errors that did not originate as a [`ChatlineError`] map to the generic
/// failure text.
pub fn user_message_of(error: &anyhow::Error) -> String {
    error
        .downcast_ref::<ChatlineError>()
        .map(ChatlineError::user_message)
        .unwrap_or_else(|| GENERIC_SEND_FAILURE.to_string())
}

/// Result type alias for Chatline operations
///
/// Uses `anyhow::Error` so callers can attach context while typed
/// [`ChatlineError`] values stay recoverable via `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;
