//! Chat session engine
//!
//! [`ChatEngine`] owns the one live [`Session`] and wires the pieces together:
//! a send streams frames through the decoder into the dispatcher, the
//! finished turn is committed and then reconciled against the server, and
//! history pages are merged on demand. Every asynchronous result is checked
//! against the session epoch before it is written, so work belonging to a
//! chat the user has already left is discarded.
//!
//! Presentation code observes progress through [`ChatEngine::subscribe`] and
//! reads state through [`ChatEngine::snapshot`].

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::client::ChatBackend;
use crate::config::SessionConfig;
use crate::error::{user_message_of, ChatlineError, Result};
use crate::models::{Attachment, ChatSummary, Message, OutgoingMessage, ToolCall};
use crate::session::{
    apply_frame, apply_initial_page, begin_page_load, finalize_turn, merge_older_page,
    reconcile_window, Dispatch, PageOutcome, Session, SkipReason,
};
use crate::stream::{decode_stream, ChatEvent, Frame};

/// Progress published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// Reply text arrived
    Delta { chat_id: String, content: String },
    /// A tool entry was created or changed
    ToolUpdated { chat_id: String, tool: ToolCall },
    /// A chat was renamed by the server
    TitleUpdated { chat_id: String, title: String },
    /// The turn's assistant message was committed
    TurnFinished { chat_id: String },
    /// The service rejected the credentials
    Unauthorized,
    /// An older page could not be loaded
    PaginationFailed { chat_id: String, error: String },
    /// The post-turn refresh failed; the optimistic copy stays
    ReconcileFailed { chat_id: String, error: String },
}

/// How a turn's stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// `done` event or sentinel
    Completed,
    /// The server sent an `error` event
    Failed(String),
    /// The stream broke mid-reply
    Interrupted(String),
    /// The stream closed without a terminal event
    Closed,
}

/// Summary of a finished turn
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Chat the turn belongs to
    pub chat_id: String,
    /// The committed assistant message (local id)
    pub message: Message,
    /// How the stream ended
    pub outcome: TurnOutcome,
    /// Whether the window was refreshed from the server afterwards
    pub reconciled: bool,
}

#[derive(Debug)]
struct EngineState {
    next_epoch: u64,
    session: Option<Session>,
    cancel: CancellationToken,
    chats: Vec<ChatSummary>,
}

impl EngineState {
    /// The live session, if it still carries `epoch`
    fn session_at(&mut self, epoch: u64) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.epoch() == epoch)
    }

    /// Drops the live session and cancels its in-flight streams
    fn retire_session(&mut self) -> u64 {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.session = None;
        self.next_epoch += 1;
        self.next_epoch
    }
}

/// Shared handle to the session engine
///
/// Cloning is cheap; clones drive the same session, so concurrent triggers
/// contend on the same guards.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use chatline::client::HttpChatBackend;
/// use chatline::config::Config;
/// use chatline::engine::ChatEngine;
/// use chatline::models::OutgoingMessage;
///
/// # async fn example() -> chatline::error::Result<()> {
/// let config = Config::default();
/// let backend = Arc::new(HttpChatBackend::new(&config.server)?);
/// let engine = ChatEngine::new(backend, config.session);
///
/// engine.select_chat("665f1c2a").await?;
/// let report = engine.send(OutgoingMessage::text("Hello")).await?;
/// println!("{}", report.message.content);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChatEngine {
    backend: Arc<dyn ChatBackend>,
    settings: SessionConfig,
    state: Arc<Mutex<EngineState>>,
    notices: broadcast::Sender<SessionNotice>,
}

impl ChatEngine {
    /// Creates an engine with no chat selected
    pub fn new(backend: Arc<dyn ChatBackend>, settings: SessionConfig) -> Self {
        let (notices, _receiver) = broadcast::channel(settings.notice_capacity.max(1));
        Self {
            backend,
            settings,
            state: Arc::new(Mutex::new(EngineState {
                next_epoch: 0,
                session: None,
                cancel: CancellationToken::new(),
                chats: Vec::new(),
            })),
            notices,
        }
    }

    /// Receives every notice published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Copy of the live session
    pub async fn snapshot(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    /// Id of the selected chat
    pub async fn active_chat_id(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .session
            .as_ref()
            .map(|s| s.chat_id().to_string())
    }

    /// Last known chat list
    pub async fn chats(&self) -> Vec<ChatSummary> {
        self.state.lock().await.chats.clone()
    }

    fn publish(&self, notice: SessionNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn publish_all(&self, notices: Vec<SessionNotice>) {
        for notice in notices {
            self.publish(notice);
        }
    }

    /// Handles a rejected token wherever it surfaces
    ///
    /// The credentials are shared by every request, so any 401 closes the
    /// live session and publishes [`SessionNotice::Unauthorized`]. Returns
    /// true when `error` was such a rejection.
    async fn observe_error(&self, error: &anyhow::Error) -> bool {
        let unauthorized = error
            .downcast_ref::<ChatlineError>()
            .is_some_and(ChatlineError::is_unauthorized);
        if unauthorized {
            tracing::warn!("Chat service rejected the credentials");
            let mut state = self.state.lock().await;
            if state.session.is_some() {
                let epoch = state.retire_session();
                tracing::debug!(epoch, "Closed session after unauthorized response");
            }
            drop(state);
            self.publish(SessionNotice::Unauthorized);
        }
        unauthorized
    }

    /// Replaces the live session with a fresh one for `chat_id` and loads its
    /// latest page
    ///
    /// The previous session's streams are cancelled and its late results are
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the initial page cannot be fetched. The
    /// new session stays selected (empty) so the caller can retry, unless the
    /// token was rejected, which closes it.
    pub async fn select_chat(&self, chat_id: &str) -> Result<()> {
        let epoch = {
            let mut state = self.state.lock().await;
            let epoch = state.retire_session();
            state.session = Some(Session::new(
                chat_id,
                epoch,
                self.settings.max_pending_sources,
            ));
            epoch
        };
        tracing::debug!(chat_id, epoch, "Selected chat");

        let page = match self
            .backend
            .fetch_messages(chat_id, None, self.settings.page_size)
            .await
        {
            Ok(page) => page,
            Err(error) => {
                self.observe_error(&error).await;
                return Err(error);
            }
        };

        let mut state = self.state.lock().await;
        match state.session_at(epoch) {
            Some(session) => {
                apply_initial_page(session, page, self.settings.page_size);
                tracing::info!(
                    chat_id,
                    count = session.messages().len(),
                    has_more = session.has_more_messages(),
                    "Loaded chat"
                );
            }
            None => tracing::debug!(chat_id, epoch, "Discarding initial page for a replaced session"),
        }
        Ok(())
    }

    /// Drops the live session without selecting another
    pub async fn close_session(&self) {
        let mut state = self.state.lock().await;
        if state.session.is_some() {
            let epoch = state.retire_session();
            tracing::debug!(epoch, "Closed session");
        }
    }

    /// Refreshes the chat list from the service
    pub async fn refresh_chats(&self) -> Result<Vec<ChatSummary>> {
        let chats = match self.backend.list_chats().await {
            Ok(chats) => chats,
            Err(error) => {
                self.observe_error(&error).await;
                return Err(error);
            }
        };
        self.state.lock().await.chats = chats.clone();
        Ok(chats)
    }

    /// Creates a chat, puts it at the head of the list, and selects it
    pub async fn create_chat(&self, title: Option<&str>) -> Result<ChatSummary> {
        let chat = match self.backend.create_chat(title).await {
            Ok(chat) => chat,
            Err(error) => {
                self.observe_error(&error).await;
                return Err(error);
            }
        };
        {
            let mut state = self.state.lock().await;
            state.chats.retain(|c| c.id != chat.id);
            state.chats.insert(0, chat.clone());
        }
        tracing::info!(chat_id = %chat.id, "Created chat");
        self.select_chat(&chat.id).await?;
        Ok(chat)
    }

    /// Renames a chat
    pub async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<ChatSummary> {
        let chat = match self.backend.rename_chat(chat_id, title).await {
            Ok(chat) => chat,
            Err(error) => {
                self.observe_error(&error).await;
                return Err(error);
            }
        };
        let mut state = self.state.lock().await;
        if let Some(entry) = state.chats.iter_mut().find(|c| c.id == chat.id) {
            *entry = chat.clone();
        }
        Ok(chat)
    }

    /// Deletes a chat; deleting the selected chat closes the session
    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        if let Err(error) = self.backend.delete_chat(chat_id).await {
            self.observe_error(&error).await;
            return Err(error);
        }
        let mut state = self.state.lock().await;
        state.chats.retain(|c| c.id != chat_id);
        if state.session.as_ref().is_some_and(|s| s.chat_id() == chat_id) {
            state.retire_session();
        }
        tracing::info!(chat_id, "Deleted chat");
        Ok(())
    }

    /// Sends a user turn in the selected chat and streams the reply
    ///
    /// The user's message appears in the window immediately. Frames are
    /// applied in arrival order until a terminal event, the sentinel, or the
    /// end of the stream. The reply is then committed and the window is
    /// refreshed from the server on a best-effort basis.
    ///
    /// # Errors
    ///
    /// - [`ChatlineError::NoActiveChat`] if no chat is selected
    /// - [`ChatlineError::TurnInProgress`] if a reply is still streaming
    /// - [`ChatlineError::SessionSuperseded`] if the chat was switched mid-turn
    /// - the backend error if the request was rejected; the turn is still
    ///   committed with the error text as its content, except for
    ///   [`ChatlineError::Unauthorized`], which closes the session
    pub async fn send(&self, message: OutgoingMessage) -> Result<TurnReport> {
        let (chat_id, epoch, cancel) = {
            let mut state = self.state.lock().await;
            let cancel = state.cancel.clone();
            let session = state.session.as_mut().ok_or(ChatlineError::NoActiveChat)?;
            if session.is_turn_open() {
                return Err(ChatlineError::TurnInProgress(session.chat_id().to_string()).into());
            }

            let mut user = Message::user(session.next_local_id(), message.content.clone());
            user.attachments = message
                .attachments
                .iter()
                .map(|a| Attachment {
                    id: session.next_local_id(),
                    filename: a.filename.clone(),
                    content_type: a.content_type.clone(),
                    size: a.size(),
                    url: String::new(),
                    local_url: a.local_url.clone(),
                })
                .collect();
            session.open_turn(user);
            (session.chat_id().to_string(), session.epoch(), cancel)
        };
        tracing::debug!(chat_id = %chat_id, epoch, "Opened turn");

        let bytes = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(self.superseded(&chat_id)),
            result = self.backend.send_message(&chat_id, &message) => match result {
                Ok(bytes) => bytes,
                Err(error) => return Err(self.reject_turn(&chat_id, epoch, error).await),
            },
        };

        let outcome = self.consume_stream(&chat_id, epoch, &cancel, bytes).await?;

        let committed = {
            let mut state = self.state.lock().await;
            state
                .session_at(epoch)
                .map(|session| (finalize_turn(session), session.next_refresh()))
        };
        let Some((committed, generation)) = committed else {
            return Err(self.superseded(&chat_id));
        };
        self.publish(SessionNotice::TurnFinished {
            chat_id: chat_id.clone(),
        });
        tracing::info!(chat_id = %chat_id, outcome = ?outcome, "Turn finished");

        let reconciled = self.reconcile(&chat_id, epoch, generation).await;

        Ok(TurnReport {
            chat_id,
            message: committed,
            outcome,
            reconciled,
        })
    }

    fn superseded(&self, chat_id: &str) -> anyhow::Error {
        tracing::debug!(chat_id, "Dropping stream for a replaced session");
        ChatlineError::SessionSuperseded(chat_id.to_string()).into()
    }

    /// Commits a turn whose request never produced a stream
    async fn reject_turn(&self, chat_id: &str, epoch: u64, error: anyhow::Error) -> anyhow::Error {
        if self.observe_error(&error).await {
            return error;
        }

        tracing::warn!(chat_id, error = %error, "Send failed");
        let committed = {
            let mut state = self.state.lock().await;
            state.session_at(epoch).map(|session| {
                session.fail_turn(&user_message_of(&error));
                finalize_turn(session);
            })
        };
        if committed.is_some() {
            self.publish(SessionNotice::TurnFinished {
                chat_id: chat_id.to_string(),
            });
        }
        error
    }

    /// Applies frames until the turn reaches a terminal state
    async fn consume_stream(
        &self,
        chat_id: &str,
        epoch: u64,
        cancel: &CancellationToken,
        bytes: crate::client::ByteStream,
    ) -> Result<TurnOutcome> {
        let mut frames = Box::pin(decode_stream(bytes));

        loop {
            let next = tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(self.superseded(chat_id)),
                next = frames.next() => next,
            };

            let mut notices = Vec::new();
            let mut outcome = None;
            {
                let mut guard = self.state.lock().await;
                let state = &mut *guard;
                let Some(session) = state.session.as_mut().filter(|s| s.epoch() == epoch) else {
                    return Err(self.superseded(chat_id));
                };

                match next {
                    Some(Ok(frame)) => {
                        let failure = match &frame {
                            Frame::Event(ChatEvent::Error { content }) => Some(content.clone()),
                            _ => None,
                        };
                        match apply_frame(session, frame) {
                            Dispatch::Appended(content) => notices.push(SessionNotice::Delta {
                                chat_id: chat_id.to_string(),
                                content,
                            }),
                            Dispatch::ToolUpdated(tool) => {
                                notices.push(SessionNotice::ToolUpdated {
                                    chat_id: chat_id.to_string(),
                                    tool,
                                })
                            }
                            Dispatch::TitleUpdated {
                                chat_id: renamed,
                                title,
                            } => {
                                if let Some(chat) = state.chats.iter_mut().find(|c| c.id == renamed) {
                                    chat.title = title.clone();
                                }
                                tracing::debug!(chat_id = %renamed, title = %title, "Chat renamed by server");
                                notices.push(SessionNotice::TitleUpdated {
                                    chat_id: renamed,
                                    title,
                                });
                            }
                            Dispatch::Terminal => {
                                outcome = Some(match failure {
                                    Some(text) => TurnOutcome::Failed(text),
                                    None => TurnOutcome::Completed,
                                });
                            }
                            Dispatch::Ignored => {}
                        }
                    }
                    Some(Err(error)) => {
                        tracing::warn!(chat_id, error = %error, "Reply stream broke");
                        session.fail_turn(&user_message_of(&error));
                        outcome = Some(TurnOutcome::Interrupted(error.to_string()));
                    }
                    None => {
                        tracing::debug!(chat_id, "Reply stream closed without a terminal event");
                        session.enter_terminal();
                        outcome = Some(TurnOutcome::Closed);
                    }
                }
            }

            self.publish_all(notices);
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
    }

    /// Adopts the server's latest page after a turn; failures are logged only
    async fn reconcile(&self, chat_id: &str, epoch: u64, generation: u64) -> bool {
        match self
            .backend
            .fetch_messages(chat_id, None, self.settings.page_size)
            .await
        {
            Ok(page) => {
                let mut state = self.state.lock().await;
                match state.session_at(epoch) {
                    Some(session) if !session.is_turn_open() => {
                        match reconcile_window(session, generation, page) {
                            Some(summary) => {
                                tracing::debug!(
                                    chat_id,
                                    generation,
                                    dropped = summary.dropped_local,
                                    retained = summary.retained,
                                    count = summary.total,
                                    "Reconciled window"
                                );
                                true
                            }
                            None => {
                                tracing::debug!(chat_id, generation, "Discarding refresh overtaken by a newer one");
                                false
                            }
                        }
                    }
                    Some(_) => {
                        tracing::debug!(chat_id, "Skipping reconciliation while a new turn is open");
                        false
                    }
                    None => {
                        tracing::debug!(chat_id, epoch, "Discarding reconciliation for a replaced session");
                        false
                    }
                }
            }
            Err(error) => {
                if self.observe_error(&error).await {
                    return false;
                }
                tracing::warn!(chat_id, error = %error, "Reconciliation failed; keeping local copy");
                self.publish(SessionNotice::ReconcileFailed {
                    chat_id: chat_id.to_string(),
                    error: error.to_string(),
                });
                false
            }
        }
    }

    /// Loads the page of messages older than the current window
    ///
    /// A trigger while a page is already loading, after the history is
    /// exhausted, or before anything server-confirmed is loaded is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ChatlineError::NoActiveChat`] without a selected chat, or the
    /// backend error after lowering the in-flight flag.
    pub async fn load_older(&self) -> Result<PageOutcome> {
        let (chat_id, epoch, cursor) = {
            let mut state = self.state.lock().await;
            let session = state.session.as_mut().ok_or(ChatlineError::NoActiveChat)?;
            match begin_page_load(session) {
                Ok(cursor) => (session.chat_id().to_string(), session.epoch(), cursor),
                Err(reason) => {
                    tracing::debug!(chat_id = %session.chat_id(), reason = %reason, "Skipping page load");
                    return Ok(PageOutcome::Skipped(reason));
                }
            }
        };
        tracing::debug!(chat_id = %chat_id, cursor = %cursor, "Loading older messages");

        let result = self
            .backend
            .fetch_messages(&chat_id, Some(&cursor), self.settings.page_size)
            .await;

        let mut state = self.state.lock().await;
        let Some(session) = state.session_at(epoch) else {
            tracing::debug!(chat_id = %chat_id, epoch, "Discarding page for a replaced session");
            return Ok(PageOutcome::Skipped(SkipReason::Superseded));
        };

        match result {
            Ok(page) => {
                let outcome = merge_older_page(session, page, self.settings.page_size);
                tracing::debug!(chat_id = %chat_id, outcome = ?outcome, "Merged older page");
                Ok(outcome)
            }
            Err(error) => {
                session.is_loading_more = false;
                drop(state);
                if self.observe_error(&error).await {
                    return Err(error);
                }
                tracing::warn!(chat_id = %chat_id, error = %error, "Loading older messages failed");
                self.publish(SessionNotice::PaginationFailed {
                    chat_id,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{summary, FakeBackend, FakeReply};
    use crate::models::{OutgoingAttachment, Role, ToolStatus};
    use crate::session::TurnPhase;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn settings() -> SessionConfig {
        SessionConfig::default()
    }

    fn msgs(ids: &[&str]) -> Vec<Message> {
        ids.iter().map(|id| Message::user(*id, *id)).collect()
    }

    fn ids(session: &Session) -> Vec<String> {
        session.messages().iter().map(|m| m.id.clone()).collect()
    }

    fn engine_with(backend: FakeBackend) -> (ChatEngine, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let engine = ChatEngine::new(backend.clone(), settings());
        (engine, backend)
    }

    async fn selected(backend: FakeBackend, window: &[&str]) -> (ChatEngine, Arc<FakeBackend>) {
        backend.push_page(msgs(window), Some(true));
        let (engine, backend) = engine_with(backend);
        engine.select_chat("c1").await.unwrap();
        (engine, backend)
    }

    #[tokio::test]
    async fn test_send_streams_tokens_into_reply() {
        let backend = FakeBackend::new();
        backend.push_lines(&[
            r#"{"type":"token","content":"Hello"}"#,
            r#"{"type":"token","content":" world"}"#,
            r#"{"type":"done"}"#,
        ]);
        let (engine, backend) = selected(backend, &[]).await;
        backend.push_page(
            vec![
                Message::user("m1", "hi"),
                Message::assistant("m2", "Hello world", vec![]),
            ],
            Some(false),
        );
        let mut notices = engine.subscribe();

        let report = engine.send(OutgoingMessage::text("hi")).await.unwrap();

        assert_eq!(report.message.content, "Hello world");
        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert!(report.reconciled);

        let session = engine.snapshot().await.unwrap();
        assert_eq!(ids(&session), vec!["m1", "m2"]);
        assert!(!session.is_loading());
        assert_eq!(session.phase(), TurnPhase::Idle);

        assert_eq!(
            notices.recv().await.unwrap(),
            SessionNotice::Delta {
                chat_id: "c1".into(),
                content: "Hello".into()
            }
        );
        assert_eq!(backend.sent_contents(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_tool_events_recorded_on_reply() {
        let backend = FakeBackend::new();
        backend.push_lines(&[
            r#"{"type":"tool_start","tool":"search"}"#,
            r#"{"type":"source","tool":"search","citations":["docA","docB"]}"#,
            r#"{"type":"tool_end","tool":"search"}"#,
            r#"{"type":"done"}"#,
        ]);
        let (engine, backend) = selected(backend, &[]).await;
        backend.push_page_error(ChatlineError::Transport("down".into()));

        let report = engine.send(OutgoingMessage::text("find it")).await.unwrap();

        assert_eq!(
            report.message.tool_calls,
            vec![ToolCall {
                name: "search".into(),
                status: ToolStatus::Completed,
                citations: Some(vec!["docA".into(), "docB".into()]),
            }]
        );
    }

    #[tokio::test]
    async fn test_error_event_becomes_reply_content() {
        let backend = FakeBackend::new();
        backend.push_lines(&[
            r#"{"type":"error","content":"Guardrail triggered"}"#,
            r#"{"type":"done"}"#,
        ]);
        let (engine, _backend) = selected(backend, &[]).await;

        let report = engine.send(OutgoingMessage::text("q")).await.unwrap();

        assert_eq!(report.message.content, "Guardrail triggered");
        assert_eq!(
            report.outcome,
            TurnOutcome::Failed("Guardrail triggered".into())
        );
    }

    #[tokio::test]
    async fn test_reconcile_failure_keeps_optimistic_copy() {
        let backend = FakeBackend::new();
        backend.push_lines(&[r#"{"type":"token","content":"ok"}"#, "[DONE]"]);
        let (engine, backend) = selected(backend, &["m1"]).await;
        backend.push_page_error(ChatlineError::Transport("timeout".into()));
        let mut notices = engine.subscribe();

        let report = engine.send(OutgoingMessage::text("q")).await.unwrap();

        assert!(!report.reconciled);
        let session = engine.snapshot().await.unwrap();
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[2].content, "ok");
        assert_eq!(session.messages()[2].role, Role::Assistant);

        let mut saw_failure = false;
        while let Ok(notice) = notices.try_recv() {
            if matches!(notice, SessionNotice::ReconcileFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_rejected_send_commits_error_text() {
        let backend = FakeBackend::new();
        backend.push_reply(FakeReply::Reject(ChatlineError::Api {
            status: 400,
            message: "Message content is required".into(),
        }));
        let (engine, _backend) = selected(backend, &[]).await;

        let error = engine.send(OutgoingMessage::text("")).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ChatlineError>(),
            Some(ChatlineError::Api { status: 400, .. })
        ));

        let session = engine.snapshot().await.unwrap();
        assert!(!session.is_loading());
        assert!(!session.is_turn_open());
        assert_eq!(
            session.messages().last().unwrap().content,
            "Message content is required"
        );
    }

    #[tokio::test]
    async fn test_unauthorized_send_closes_session() {
        let backend = FakeBackend::new();
        backend.push_reply(FakeReply::Reject(ChatlineError::Unauthorized));
        let (engine, _backend) = selected(backend, &[]).await;
        let mut notices = engine.subscribe();

        let error = engine.send(OutgoingMessage::text("q")).await.unwrap_err();

        assert!(error
            .downcast_ref::<ChatlineError>()
            .is_some_and(ChatlineError::is_unauthorized));
        assert_eq!(notices.recv().await.unwrap(), SessionNotice::Unauthorized);
        assert!(engine.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_broken_stream_keeps_partial_reply() {
        let backend = FakeBackend::new();
        backend.push_reply(FakeReply::BrokenAfter(vec![
            "data: {\"type\":\"token\",\"content\":\"partial\"}\n".into(),
        ]));
        let (engine, _backend) = selected(backend, &[]).await;

        let report = engine.send(OutgoingMessage::text("q")).await.unwrap();

        assert_eq!(report.message.content, "partial");
        assert!(matches!(report.outcome, TurnOutcome::Interrupted(_)));
    }

    #[tokio::test]
    async fn test_stream_closed_without_done() {
        let backend = FakeBackend::new();
        backend.push_reply(FakeReply::Chunks(vec![
            "data: {\"type\":\"token\",\"content\":\"tail\"}".into(),
        ]));
        let (engine, _backend) = selected(backend, &[]).await;

        let report = engine.send(OutgoingMessage::text("q")).await.unwrap();

        assert_eq!(report.message.content, "tail");
        assert_eq!(report.outcome, TurnOutcome::Closed);
    }

    #[tokio::test]
    async fn test_send_without_chat_fails() {
        let (engine, _backend) = engine_with(FakeBackend::new());
        let error = engine.send(OutgoingMessage::text("q")).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ChatlineError>(),
            Some(ChatlineError::NoActiveChat)
        ));
    }

    #[tokio::test]
    async fn test_second_send_while_streaming_rejected() {
        let backend = FakeBackend::new();
        let tx = backend.push_channel();
        let (engine, _backend) = selected(backend, &[]).await;

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send(OutgoingMessage::text("one")).await }
        });
        tx.send(Ok(Bytes::from_static(b"data: {\"type\":\"token\",\"content\":\"a\"}\n")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let error = engine.send(OutgoingMessage::text("two")).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ChatlineError>(),
            Some(ChatlineError::TurnInProgress(_))
        ));

        tx.send(Ok(Bytes::from_static(b"data: [DONE]\n"))).unwrap();
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.message.content, "a");
    }

    #[tokio::test]
    async fn test_switch_mid_stream_discards_late_frames() {
        let backend = FakeBackend::new();
        let tx = backend.push_channel();
        let (engine, backend) = selected(backend, &["m1"]).await;

        let turn = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send(OutgoingMessage::text("q")).await }
        });
        tx.send(Ok(Bytes::from_static(b"data: {\"type\":\"token\",\"content\":\"a\"}\n")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        backend.push_page(msgs(&["x1", "x2"]), Some(false));
        engine.select_chat("c2").await.unwrap();
        let _ = tx.send(Ok(Bytes::from_static(
            b"data: {\"type\":\"token\",\"content\":\"late\"}\n",
        )));

        let error = turn.await.unwrap().unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ChatlineError>(),
            Some(ChatlineError::SessionSuperseded(_))
        ));

        let session = engine.snapshot().await.unwrap();
        assert_eq!(session.chat_id(), "c2");
        assert_eq!(ids(&session), vec!["x1", "x2"]);
        assert!(session.streaming_buffer().is_empty());
    }

    #[tokio::test]
    async fn test_attachments_on_optimistic_message() {
        let backend = FakeBackend::new();
        let (engine, backend) = selected(backend, &[]).await;
        backend.push_page_error(ChatlineError::Transport("down".into()));
        let mut attachment = OutgoingAttachment::new("report.pdf", "application/pdf", vec![1u8, 2, 3]);
        attachment.local_url = Some("file:///tmp/report.pdf".into());

        engine
            .send(OutgoingMessage::text("see file").with_attachment(attachment))
            .await
            .unwrap();

        let session = engine.snapshot().await.unwrap();
        let user = &session.messages()[0];
        assert_eq!(user.attachments.len(), 1);
        assert_eq!(user.attachments[0].size, 3);
        assert_eq!(
            user.attachments[0].local_url.as_deref(),
            Some("file:///tmp/report.pdf")
        );
        assert_eq!(backend.sent_attachment_counts(), vec![1]);
    }

    #[tokio::test]
    async fn test_load_older_merges_and_exhausts() {
        let backend = FakeBackend::new();
        let (engine, backend) = selected(backend, &["m5", "m6", "m7", "m8", "m9", "m10"]).await;
        backend.push_page(msgs(&["m1", "m2", "m3", "m4"]), None);

        let outcome = engine.load_older().await.unwrap();

        assert_eq!(
            outcome,
            PageOutcome::Merged {
                added: 4,
                has_more: false
            }
        );
        let session = engine.snapshot().await.unwrap();
        assert_eq!(ids(&session).len(), 10);
        assert_eq!(ids(&session)[0], "m1");

        let fetches = backend.fetches();
        let last = fetches.last().unwrap();
        assert_eq!(last.before.as_deref(), Some("m5"));
        assert_eq!(last.limit, 10);

        assert_eq!(
            engine.load_older().await.unwrap(),
            PageOutcome::Skipped(SkipReason::NoMoreMessages)
        );
    }

    #[tokio::test]
    async fn test_concurrent_load_older_issues_one_fetch() {
        let (backend, gate) = FakeBackend::gated();
        let backend = Arc::new(backend);
        backend.push_page(msgs(&["m5"]), Some(true));
        backend.push_page(msgs(&["m1", "m2"]), Some(true));
        let engine = ChatEngine::new(backend.clone(), settings());

        gate.add_permits(1);
        engine.select_chat("c1").await.unwrap();

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.load_older().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = engine.load_older().await.unwrap();
        assert_eq!(second, PageOutcome::Skipped(SkipReason::InFlight));

        gate.add_permits(1);
        let first = first.await.unwrap().unwrap();
        assert_eq!(
            first,
            PageOutcome::Merged {
                added: 2,
                has_more: true
            }
        );
        assert_eq!(backend.fetches().len(), 2);
    }

    #[tokio::test]
    async fn test_load_older_failure_clears_flag() {
        let backend = FakeBackend::new();
        let (engine, backend) = selected(backend, &["m5"]).await;
        backend.push_page_error(ChatlineError::Transport("reset".into()));
        let mut notices = engine.subscribe();

        assert!(engine.load_older().await.is_err());

        let session = engine.snapshot().await.unwrap();
        assert!(!session.is_loading_more());
        assert!(session.has_more_messages());
        assert!(matches!(
            notices.recv().await.unwrap(),
            SessionNotice::PaginationFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_page_after_switch_is_discarded() {
        let (backend, gate) = FakeBackend::gated();
        let backend = Arc::new(backend);
        backend.push_page(msgs(&["m5"]), Some(true));
        backend.push_page(msgs(&["m1"]), Some(true));
        backend.push_page(msgs(&["x1"]), Some(false));
        let engine = ChatEngine::new(backend.clone(), settings());

        gate.add_permits(1);
        engine.select_chat("c1").await.unwrap();

        let pending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.load_older().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let switch = tokio::spawn({
            let engine = engine.clone();
            async move { engine.select_chat("c2").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Waiters are served in order: the stale page load first, then the switch.
        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(1);

        assert_eq!(
            pending.await.unwrap().unwrap(),
            PageOutcome::Skipped(SkipReason::Superseded)
        );
        switch.await.unwrap().unwrap();

        let session = engine.snapshot().await.unwrap();
        assert_eq!(session.chat_id(), "c2");
        assert!(!ids(&session).contains(&"m1".to_string()));
    }

    fn dated(id: &str, role: Role, minute: i64) -> Message {
        let mut message = Message::user(id, id);
        message.role = role;
        message.created_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
            + chrono::Duration::minutes(minute);
        message
    }

    #[tokio::test]
    async fn test_late_refresh_does_not_reorder_window() {
        let backend = FakeBackend::new();
        backend.push_lines(&[r#"{"type":"token","content":"r1"}"#, "[DONE]"]);
        backend.push_lines(&[r#"{"type":"token","content":"r2"}"#, "[DONE]"]);
        backend.push_page(vec![dated("m1", Role::User, 0)], Some(false));
        let (engine, backend) = engine_with(backend);
        engine.select_chat("c1").await.unwrap();

        let release = backend.push_held_page(
            vec![
                dated("m1", Role::User, 0),
                dated("u1", Role::User, 1),
                dated("a1", Role::Assistant, 2),
            ],
            Some(false),
        );
        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send(OutgoingMessage::text("q1")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        backend.push_page(
            vec![
                dated("m1", Role::User, 0),
                dated("u1", Role::User, 1),
                dated("a1", Role::Assistant, 2),
                dated("u2", Role::User, 3),
                dated("a2", Role::Assistant, 4),
            ],
            Some(false),
        );
        let second = engine.send(OutgoingMessage::text("q2")).await.unwrap();
        assert!(second.reconciled);

        release.send(()).unwrap();
        let first = first.await.unwrap().unwrap();
        assert!(!first.reconciled);

        let session = engine.snapshot().await.unwrap();
        assert_eq!(ids(&session), vec!["m1", "u1", "a1", "u2", "a2"]);
    }

    #[tokio::test]
    async fn test_refresh_after_switch_is_discarded() {
        let backend = FakeBackend::new();
        backend.push_lines(&[r#"{"type":"token","content":"r1"}"#, "[DONE]"]);
        let (engine, backend) = selected(backend, &["m1"]).await;

        let release = backend.push_held_page(msgs(&["m1", "u1", "a1"]), Some(false));
        let turn = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send(OutgoingMessage::text("q1")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        backend.push_page(msgs(&["x1"]), Some(false));
        engine.select_chat("c2").await.unwrap();
        release.send(()).unwrap();

        let report = turn.await.unwrap().unwrap();
        assert!(!report.reconciled);

        let session = engine.snapshot().await.unwrap();
        assert_eq!(session.chat_id(), "c2");
        assert_eq!(ids(&session), vec!["x1"]);
    }

    #[tokio::test]
    async fn test_refresh_skipped_while_next_turn_streams() {
        let backend = FakeBackend::new();
        backend.push_lines(&[r#"{"type":"token","content":"r1"}"#, "[DONE]"]);
        let tx = backend.push_channel();
        let (engine, backend) = selected(backend, &["m1"]).await;

        let release = backend.push_held_page(msgs(&["m1", "u1", "a1"]), Some(false));
        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send(OutgoingMessage::text("q1")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send(OutgoingMessage::text("q2")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        release.send(()).unwrap();
        let first = first.await.unwrap().unwrap();
        assert!(!first.reconciled);

        let session = engine.snapshot().await.unwrap();
        assert!(session.is_turn_open());
        assert!(!ids(&session).contains(&"u1".to_string()));
        assert_eq!(session.messages().len(), 4);

        tx.send(Ok(Bytes::from_static(b"data: [DONE]\n"))).unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(second.outcome, TurnOutcome::Completed);
    }

    #[tokio::test]
    async fn test_unauthorized_page_load_closes_session() {
        let (engine, backend) = selected(FakeBackend::new(), &["m5"]).await;
        backend.push_page_error(ChatlineError::Unauthorized);
        let mut notices = engine.subscribe();

        let error = engine.load_older().await.unwrap_err();

        assert!(error
            .downcast_ref::<ChatlineError>()
            .is_some_and(ChatlineError::is_unauthorized));
        assert_eq!(notices.recv().await.unwrap(), SessionNotice::Unauthorized);
        assert!(engine.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_refresh_closes_session() {
        let backend = FakeBackend::new();
        backend.push_lines(&[r#"{"type":"token","content":"ok"}"#, "[DONE]"]);
        let (engine, backend) = selected(backend, &["m1"]).await;
        backend.push_page_error(ChatlineError::Unauthorized);

        let report = engine.send(OutgoingMessage::text("q")).await.unwrap();

        assert!(!report.reconciled);
        assert_eq!(report.message.content, "ok");
        assert!(engine.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_title_update_renames_listed_chat() {
        let backend = FakeBackend::new();
        backend.set_chats(vec![summary("c1", "New Chat"), summary("c9", "Other")]);
        backend.push_lines(&[
            r#"{"type":"title_update","chat_id":"c1","title":"Budget review"}"#,
            r#"{"type":"done"}"#,
        ]);
        let (engine, _backend) = selected(backend, &[]).await;
        engine.refresh_chats().await.unwrap();

        engine.send(OutgoingMessage::text("q")).await.unwrap();

        let chats = engine.chats().await;
        assert_eq!(chats[0].title, "Budget review");
        assert_eq!(chats[1].title, "Other");
    }

    #[tokio::test]
    async fn test_create_rename_delete_chat() {
        let (engine, _backend) = engine_with(FakeBackend::new());

        let chat = engine.create_chat(Some("Draft")).await.unwrap();
        assert_eq!(engine.active_chat_id().await.as_deref(), Some(chat.id.as_str()));
        assert_eq!(engine.chats().await[0].id, chat.id);

        let renamed = engine.rename_chat(&chat.id, "Final").await.unwrap();
        assert_eq!(renamed.title, "Final");
        assert_eq!(engine.chats().await[0].title, "Final");

        engine.delete_chat(&chat.id).await.unwrap();
        assert!(engine.chats().await.is_empty());
        assert!(engine.snapshot().await.is_none());
    }
}
