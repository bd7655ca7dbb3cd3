//! Request surface of the chat backend
//!
//! [`ChatBackend`] is the seam between the session engine and the network.
//! [`HttpChatBackend`] talks to the real service with `reqwest`; tests drive
//! the engine through an in-process fake instead.

pub mod http;

#[cfg(test)]
pub mod fake;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::{ChatlineError, Result};
use crate::models::{ChatSummary, MessagePage, OutgoingMessage};

pub use http::HttpChatBackend;

/// Raw body of a streaming reply
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Operations the engine needs from the chat service
///
/// Implementations map HTTP 401 to [`ChatlineError::Unauthorized`] and every
/// other non-success status to [`ChatlineError::Api`].
#[async_trait]
pub trait ChatBackend: Send + Sync + std::fmt::Debug {
    /// Posts a user turn and returns the reply event stream
    ///
    /// Messages with attachments go through the multipart endpoint.
    async fn send_message(&self, chat_id: &str, message: &OutgoingMessage) -> Result<ByteStream>;

    /// Fetches up to `limit` messages, optionally strictly older than `before`
    async fn fetch_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<MessagePage>;

    /// Lists the user's chats, most recently active first
    async fn list_chats(&self) -> Result<Vec<ChatSummary>>;

    /// Creates a chat
    async fn create_chat(&self, title: Option<&str>) -> Result<ChatSummary>;

    /// Renames a chat
    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<ChatSummary>;

    /// Deletes a chat and its messages
    async fn delete_chat(&self, chat_id: &str) -> Result<()>;
}

/// Maps a non-success response to a typed error
///
/// The message comes from a JSON `detail` field when present (a string, or a
/// list of objects carrying `msg`), otherwise from the raw body.
///
/// # Examples
///
/// ```
/// use chatline::client::error_from_response;
/// use chatline::error::ChatlineError;
///
/// let error = error_from_response(400, r#"{"detail":"Message content is required"}"#);
/// assert!(matches!(
///     error,
///     ChatlineError::Api { status: 400, ref message } if message == "Message content is required"
/// ));
/// ```
pub fn error_from_response(status: u16, body: &str) -> ChatlineError {
    if status == 401 {
        return ChatlineError::Unauthorized;
    }
    ChatlineError::Api {
        status,
        message: extract_detail(body)
            .unwrap_or_else(|| format!("request failed with status {}", status)),
    }
}

fn extract_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return Some(trimmed.to_string());
    };

    match value.get("detail") {
        Some(serde_json::Value::String(detail)) => Some(detail.clone()),
        Some(serde_json::Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        Some(other) => Some(other.to_string()),
        None => value
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| Some(trimmed.to_string())),
    }
}
