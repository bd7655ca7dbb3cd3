//! HTTP implementation of [`ChatBackend`]
//!
//! All endpoints live under `{base_url}/api/chat`. Streaming replies are
//! returned as raw byte streams; framing is the decoder's job.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::{error_from_response, ByteStream, ChatBackend};
use crate::config::ServerConfig;
use crate::error::{ChatlineError, Result};
use crate::models::{ChatSummary, MessagePage, OutgoingMessage};

#[derive(Debug, Serialize)]
struct ContentBody<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct TitleBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default = "default_ok")]
    ok: bool,
}

fn default_ok() -> bool {
    true
}

/// Chat service client backed by `reqwest`
///
/// # Examples
///
/// ```no_run
/// use chatline::client::{ChatBackend, HttpChatBackend};
/// use chatline::config::ServerConfig;
///
/// # async fn example() -> chatline::error::Result<()> {
/// let backend = HttpChatBackend::new(&ServerConfig::default())?;
/// let chats = backend.list_chats().await?;
/// println!("{} chats", chats.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
    request_timeout: Duration,
}

impl HttpChatBackend {
    /// Builds a client from server settings
    ///
    /// Only the connect phase has a client-wide timeout. Non-streaming
    /// requests additionally get `request_timeout_seconds`; reply streams
    /// may stay open indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`ChatlineError::Config`] if the base URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ChatlineError::Config(format!("invalid base_url '{}': {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(
                ChatlineError::Config(format!("base_url '{}' cannot be a base", base_url)).into(),
            );
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .user_agent(concat!("chatline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatlineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        tracing::debug!(base_url = %base_url, "Initialized chat backend");

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
        })
    }

    /// Resolves `/api/chat/<segments...>` against the base URL
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ChatlineError::Config(format!("base_url '{}' cannot be a base", self.base_url))
            })?;
            path.pop_if_empty().extend(["api", "chat"]).extend(segments);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends a request and turns transport failures and error statuses into
    /// typed errors
    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ChatlineError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!("Chat service rejected the credentials");
        } else {
            tracing::debug!(status = status.as_u16(), body = %body, "Chat service returned an error");
        }
        Err(error_from_response(status.as_u16(), &body).into())
    }

    async fn execute_json<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.execute(request.timeout(self.request_timeout)).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ChatlineError::Transport(e.to_string()))?;
        Ok(serde_json::from_slice(&body).map_err(ChatlineError::from)?)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn send_message(&self, chat_id: &str, message: &OutgoingMessage) -> Result<ByteStream> {
        let request = if message.has_attachments() {
            let url = self.endpoint(&[chat_id, "message_with_files"])?;
            let mut form = Form::new().text("content", message.content.clone());
            for attachment in &message.attachments {
                let part = Part::bytes(attachment.data.to_vec())
                    .file_name(attachment.filename.clone())
                    .mime_str(&attachment.content_type)
                    .map_err(|e| {
                        ChatlineError::Attachment(format!(
                            "invalid content type '{}': {}",
                            attachment.content_type, e
                        ))
                    })?;
                form = form.part("files", part);
            }
            tracing::debug!(
                chat_id,
                files = message.attachments.len(),
                "Posting message with attachments"
            );
            self.client.post(url).multipart(form)
        } else {
            let url = self.endpoint(&[chat_id, "message"])?;
            tracing::debug!(chat_id, "Posting message");
            self.client.post(url).json(&ContentBody {
                content: &message.content,
            })
        };

        let response = self.execute(request).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ChatlineError::Transport(e.to_string()).into()));
        Ok(Box::pin(stream))
    }

    async fn fetch_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<MessagePage> {
        let mut url = self.endpoint(&[chat_id, "messages"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(cursor) = before {
                query.append_pair("before", cursor);
            }
        }
        tracing::debug!(chat_id, before = ?before, limit, "Fetching messages");
        self.execute_json(self.client.get(url)).await
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        let url = self.endpoint(&[])?;
        self.execute_json(self.client.get(url)).await
    }

    async fn create_chat(&self, title: Option<&str>) -> Result<ChatSummary> {
        let url = self.endpoint(&[])?;
        self.execute_json(self.client.post(url).json(&TitleBody { title }))
            .await
    }

    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<ChatSummary> {
        let url = self.endpoint(&[chat_id])?;
        self.execute_json(self.client.patch(url).json(&TitleBody { title: Some(title) }))
            .await
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        let url = self.endpoint(&[chat_id])?;
        let response: DeleteResponse = self.execute_json(self.client.delete(url)).await?;
        if !response.ok {
            tracing::warn!(chat_id, "Chat service did not confirm deletion");
        }
        Ok(())
    }
}
