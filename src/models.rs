//! Data model shared by the session engine and the request surface
//!
//! Messages, tool lifecycle entries, and attachments mirror the JSON the
//! chat backend returns from its history endpoint. Client-only fields such
//! as [`Attachment::local_url`] are never serialized.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ChatlineError, Result};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the user
    User,
    /// Reply produced by the backend
    Assistant,
    /// Backend-side instruction that occasionally appears in history
    System,
}

/// Lifecycle of a tool invocation
///
/// Transitions are monotonic: `Started -> Completed` or `Started -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Announced by `tool_start`, not yet finished
    Started,
    /// Finished successfully; persisted history entries carry no status and
    /// default to this
    #[default]
    Completed,
    /// The turn failed while the tool was still running
    Failed,
}

impl ToolStatus {
    /// Returns true once the status can no longer change
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

/// A tool invocation attached to an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name as announced by the backend
    pub name: String,
    /// Current lifecycle status
    #[serde(default)]
    pub status: ToolStatus,
    /// Retrieval provenance reported through `source` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<String>>,
}

impl ToolCall {
    /// Creates a freshly started tool entry
    ///
    /// # Examples
    ///
    /// ```
    /// use chatline::models::{ToolCall, ToolStatus};
    ///
    /// let tool = ToolCall::started("search");
    /// assert_eq!(tool.status, ToolStatus::Started);
    /// assert!(tool.citations.is_none());
    /// ```
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ToolStatus::Started,
            citations: None,
        }
    }

    /// Moves the entry to `status` unless it already reached a final state
    ///
    /// Returns true when the status changed.
    pub fn transition(&mut self, status: ToolStatus) -> bool {
        if self.status.is_final() || status == ToolStatus::Started {
            return false;
        }
        self.status = status;
        true
    }

    /// Appends citations, skipping ones already recorded
    pub fn attach_citations(&mut self, citations: Vec<String>) {
        let existing = self.citations.get_or_insert_with(Vec::new);
        for citation in citations {
            if !existing.contains(&citation) {
                existing.push(citation);
            }
        }
    }
}

/// File attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Server-assigned attachment id (local placeholder before reconciliation)
    pub id: String,
    /// Original file name
    pub filename: String,
    /// MIME type
    pub content_type: String,
    /// Size in bytes
    pub size: u64,
    /// Server URL the attachment can be fetched from
    #[serde(default)]
    pub url: String,
    /// Client-only preview reference; never sent to or read from the server
    #[serde(skip)]
    pub local_url: Option<String>,
}

/// One message in a chat window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id within the loaded window
    pub id: String,
    /// Author of the message
    pub role: Role,
    /// Message text
    #[serde(default)]
    pub content: String,
    /// Tools invoked while producing the message
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ToolCall>,
    /// Files sent with the message
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
    /// Creation time
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Builds a user message with the given id and content
    ///
    /// # Examples
    ///
    /// ```
    /// use chatline::models::{Message, Role};
    ///
    /// let msg = Message::user("local-1", "Hello");
    /// assert_eq!(msg.role, Role::User);
    /// assert!(msg.tool_calls.is_empty());
    /// ```
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Builds an assistant message from the final turn state
    pub fn assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Chat metadata as listed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    /// Chat id
    pub id: String,
    /// Display title
    pub title: String,
    /// Creation time
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Last activity time
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// One page of history returned by the messages endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagePage {
    /// Messages in chronological (oldest-first) order
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Explicit server flag telling whether older messages remain
    #[serde(default)]
    pub has_more: Option<bool>,
}

/// File to upload with an outgoing message
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    /// File name sent in the multipart part
    pub filename: String,
    /// MIME type of the part
    pub content_type: String,
    /// Raw file contents
    pub data: Bytes,
    /// Local preview reference copied onto the optimistic message
    pub local_url: Option<String>,
}

impl OutgoingAttachment {
    /// Creates an attachment from in-memory bytes
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
            local_url: None,
        }
    }

    /// Reads a local file, guessing its MIME type from the extension
    ///
    /// # Errors
    ///
    /// Returns [`ChatlineError::Attachment`] if the file cannot be read or has
    /// no usable file name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ChatlineError::Attachment(format!("invalid file name: {}", path.display()))
            })?
            .to_string();

        let data = tokio::fs::read(path).await.map_err(|e| {
            ChatlineError::Attachment(format!("failed to read {}: {}", path.display(), e))
        })?;

        let absolute: PathBuf = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let local_url = url::Url::from_file_path(&absolute)
            .ok()
            .map(|u| u.to_string());

        Ok(Self {
            content_type: guess_content_type(&filename).to_string(),
            filename,
            data: Bytes::from(data),
            local_url,
        })
    }

    /// Size of the payload in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Content of a user turn
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    /// Text typed by the user
    pub content: String,
    /// Files to upload alongside the text
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingMessage {
    /// Text-only message
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Adds an attachment
    pub fn with_attachment(mut self, attachment: OutgoingAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Returns true when the message must go through the multipart endpoint
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// MIME type for the file extensions the backend accepts
pub fn guess_content_type(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "txt" | "md" | "log" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 timestamps as well as offset-less ones, which are UTC
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Parses a backend timestamp
///
/// # Examples
///
/// ```
/// use chatline::models::parse_timestamp;
///
/// let with_offset = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
/// let naive = parse_timestamp("2024-05-01T10:00:00.000000").unwrap();
/// assert_eq!(with_offset, naive);
/// ```
pub fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
}
