//! Scripted in-process backend for engine tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::client::{ByteStream, ChatBackend};
use crate::error::{ChatlineError, Result};
use crate::models::{ChatSummary, Message, MessagePage, OutgoingMessage};

/// Scripted reply to one `send_message` call
#[derive(Debug)]
pub enum FakeReply {
    /// Body delivered as the given chunks, then closed
    Chunks(Vec<String>),
    /// Body chunks followed by a transport failure
    BrokenAfter(Vec<String>),
    /// Body fed by the test through a channel
    Channel(mpsc::UnboundedReceiver<Result<Bytes>>),
    /// The request itself fails
    Reject(ChatlineError),
}

/// One recorded `fetch_messages` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub chat_id: String,
    pub before: Option<String>,
    pub limit: usize,
}

#[derive(Debug)]
struct ScriptedPage {
    result: std::result::Result<MessagePage, ChatlineError>,
    hold: Option<oneshot::Receiver<()>>,
}

#[derive(Debug, Default)]
struct Script {
    pages: VecDeque<ScriptedPage>,
    replies: VecDeque<FakeReply>,
    fetches: Vec<FetchCall>,
    sent: Vec<(String, OutgoingMessage)>,
    chats: Vec<ChatSummary>,
    created: usize,
}

/// Backend whose responses are queued up front by the test
#[derive(Debug, Default)]
pub struct FakeBackend {
    script: Mutex<Script>,
    fetch_gate: Option<Arc<Semaphore>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every fetch until the returned semaphore gets a permit
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Self {
            fetch_gate: Some(gate.clone()),
            ..Self::default()
        };
        (backend, gate)
    }

    fn queue_page(
        &self,
        result: std::result::Result<MessagePage, ChatlineError>,
        hold: Option<oneshot::Receiver<()>>,
    ) {
        self.script
            .lock()
            .unwrap()
            .pages
            .push_back(ScriptedPage { result, hold });
    }

    pub fn push_page(&self, messages: Vec<Message>, has_more: Option<bool>) {
        self.queue_page(Ok(MessagePage { messages, has_more }), None);
    }

    /// Queues a page that is only returned once the sender fires or drops
    ///
    /// Pages are assigned to fetches in call order, so a held page lets later
    /// fetches finish first.
    pub fn push_held_page(
        &self,
        messages: Vec<Message>,
        has_more: Option<bool>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.queue_page(Ok(MessagePage { messages, has_more }), Some(rx));
        tx
    }

    pub fn push_page_error(&self, error: ChatlineError) {
        self.queue_page(Err(error), None);
    }

    pub fn push_reply(&self, reply: FakeReply) {
        self.script.lock().unwrap().replies.push_back(reply);
    }

    /// Queues a reply made of `data:` lines, one chunk per line
    pub fn push_lines(&self, lines: &[&str]) {
        let chunks = lines.iter().map(|l| format!("data: {}\n", l)).collect();
        self.push_reply(FakeReply::Chunks(chunks));
    }

    /// Queues a reply stream fed by the returned sender
    pub fn push_channel(&self) -> mpsc::UnboundedSender<Result<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push_reply(FakeReply::Channel(rx));
        tx
    }

    pub fn set_chats(&self, chats: Vec<ChatSummary>) {
        self.script.lock().unwrap().chats = chats;
    }

    pub fn fetches(&self) -> Vec<FetchCall> {
        self.script.lock().unwrap().fetches.clone()
    }

    pub fn sent_contents(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(_, m)| m.content.clone())
            .collect()
    }

    pub fn sent_attachment_counts(&self) -> Vec<usize> {
        self.script
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(_, m)| m.attachments.len())
            .collect()
    }
}

/// Builds a chat summary stamped with the current time
pub fn summary(id: &str, title: &str) -> ChatSummary {
    let now = Utc::now();
    ChatSummary {
        id: id.to_string(),
        title: title.to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn chunk_stream(chunks: Vec<String>, fail_at_end: bool) -> ByteStream {
    let mut items: Vec<Result<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
    if fail_at_end {
        items.push(Err(ChatlineError::Transport("connection reset".into()).into()));
    }
    Box::pin(futures::stream::iter(items))
}

fn channel_stream(rx: mpsc::UnboundedReceiver<Result<Bytes>>) -> ByteStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn send_message(&self, chat_id: &str, message: &OutgoingMessage) -> Result<ByteStream> {
        let reply = {
            let mut script = self.script.lock().unwrap();
            script.sent.push((chat_id.to_string(), message.clone()));
            script.replies.pop_front()
        };
        match reply {
            Some(FakeReply::Chunks(chunks)) => Ok(chunk_stream(chunks, false)),
            Some(FakeReply::BrokenAfter(chunks)) => Ok(chunk_stream(chunks, true)),
            Some(FakeReply::Channel(rx)) => Ok(channel_stream(rx)),
            Some(FakeReply::Reject(error)) => Err(error.into()),
            None => Ok(chunk_stream(vec!["data: [DONE]\n".to_string()], false)),
        }
    }

    async fn fetch_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<MessagePage> {
        let scripted = {
            let mut script = self.script.lock().unwrap();
            script.fetches.push(FetchCall {
                chat_id: chat_id.to_string(),
                before: before.map(str::to_string),
                limit,
            });
            script.pages.pop_front()
        };

        if let Some(gate) = &self.fetch_gate {
            gate.acquire().await.unwrap().forget();
        }

        match scripted {
            Some(ScriptedPage { result, hold }) => {
                if let Some(hold) = hold {
                    let _ = hold.await;
                }
                result.map_err(Into::into)
            }
            None => Ok(MessagePage {
                messages: Vec::new(),
                has_more: Some(false),
            }),
        }
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        Ok(self.script.lock().unwrap().chats.clone())
    }

    async fn create_chat(&self, title: Option<&str>) -> Result<ChatSummary> {
        let mut script = self.script.lock().unwrap();
        script.created += 1;
        let chat = summary(
            &format!("chat-new-{}", script.created),
            title.unwrap_or("New Chat"),
        );
        script.chats.insert(0, chat.clone());
        Ok(chat)
    }

    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<ChatSummary> {
        let mut script = self.script.lock().unwrap();
        let chat = script
            .chats
            .iter_mut()
            .find(|c| c.id == chat_id)
            .ok_or_else(|| ChatlineError::Api {
                status: 404,
                message: "Chat not found".into(),
            })?;
        chat.title = title.to_string();
        Ok(chat.clone())
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.script.lock().unwrap().chats.retain(|c| c.id != chat_id);
        Ok(())
    }
}
