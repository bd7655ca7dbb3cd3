//! Session state store
//!
//! A [`Session`] holds everything the engine knows about the selected chat:
//! the ordered message window, the transient per-turn buffers, and the
//! pagination flags. Exactly one session is live at a time and a chat switch
//! replaces it wholesale, so every session is stamped with an epoch that
//! asynchronous work compares against before writing.

use std::collections::{HashSet, VecDeque};

use crate::models::{Message, ToolCall, ToolStatus};

/// Prefix of ids assigned to optimistic local records
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Lifecycle of the active turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    /// No turn is open
    #[default]
    Idle,
    /// Request sent, no content yet
    AwaitingFirstToken,
    /// Content is arriving
    Streaming,
    /// The stream finished (done, error, or closed) and awaits finalization
    Terminal,
}

impl TurnPhase {
    /// Returns true while frames from the stream are still applied
    pub fn accepts_frames(&self) -> bool {
        matches!(self, Self::AwaitingFirstToken | Self::Streaming)
    }
}

/// Monotonic id source for optimistic records
///
/// # Examples
///
/// ```
/// use chatline::session::LocalIdSequence;
///
/// let mut ids = LocalIdSequence::default();
/// assert_eq!(ids.next_id(), "local-1");
/// assert_eq!(ids.next_id(), "local-2");
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalIdSequence {
    last: u64,
}

impl LocalIdSequence {
    /// Returns the next unused local id
    pub fn next_id(&mut self) -> String {
        self.last += 1;
        format!("{}{}", LOCAL_ID_PREFIX, self.last)
    }
}

/// Returns true for ids minted by [`LocalIdSequence`]
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Citations that arrived before the `tool_start` they belong to
///
/// Bounded: once full, the oldest entry is evicted.
#[derive(Debug, Clone)]
pub struct PendingSources {
    entries: VecDeque<(String, Vec<String>)>,
    capacity: usize,
}

impl PendingSources {
    /// Creates an empty table holding at most `capacity` tool names
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Stores citations for `name`, merging with anything already stashed
    pub fn stash(&mut self, name: &str, citations: Vec<String>) {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(n, _)| n == name) {
            for citation in citations {
                if !existing.contains(&citation) {
                    existing.push(citation);
                }
            }
            return;
        }

        if self.entries.len() == self.capacity {
            if let Some((evicted, _)) = self.entries.pop_front() {
                tracing::debug!(tool = %evicted, "evicting stale pending citations");
            }
        }
        self.entries.push_back((name.to_string(), citations));
    }

    /// Removes and returns the citations stashed for `name`
    pub fn take(&mut self, name: &str) -> Option<Vec<String>> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        self.entries.remove(index).map(|(_, citations)| citations)
    }

    /// Drops every stashed entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of tool names with stashed citations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is stashed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// State of the currently selected chat
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) chat_id: String,
    pub(crate) epoch: u64,
    pub(crate) messages: Vec<Message>,
    pub(crate) streaming_buffer: String,
    pub(crate) active_tools: Vec<ToolCall>,
    pub(crate) has_more_messages: bool,
    pub(crate) is_loading_more: bool,
    pub(crate) is_loading: bool,
    pub(crate) phase: TurnPhase,
    pub(crate) received_token: bool,
    pub(crate) pending_sources: PendingSources,
    pub(crate) local_ids: LocalIdSequence,
    pub(crate) refresh_issued: u64,
    pub(crate) refresh_applied: u64,
}

impl Session {
    /// Creates an empty session for `chat_id`
    ///
    /// # Examples
    ///
    /// ```
    /// use chatline::session::{Session, TurnPhase};
    ///
    /// let session = Session::new("chat-1", 1, 32);
    /// assert!(session.messages().is_empty());
    /// assert!(session.has_more_messages());
    /// assert_eq!(session.phase(), TurnPhase::Idle);
    /// ```
    pub fn new(chat_id: impl Into<String>, epoch: u64, max_pending_sources: usize) -> Self {
        Self {
            chat_id: chat_id.into(),
            epoch,
            messages: Vec::new(),
            streaming_buffer: String::new(),
            active_tools: Vec::new(),
            has_more_messages: true,
            is_loading_more: false,
            is_loading: false,
            phase: TurnPhase::Idle,
            received_token: false,
            pending_sources: PendingSources::new(max_pending_sources),
            local_ids: LocalIdSequence::default(),
            refresh_issued: 0,
            refresh_applied: 0,
        }
    }

    /// Chat this session belongs to
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Identity stamp compared by asynchronous writers
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Loaded window, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Partial assistant reply of the open turn
    pub fn streaming_buffer(&self) -> &str {
        &self.streaming_buffer
    }

    /// Tool entries announced during the open turn
    pub fn active_tools(&self) -> &[ToolCall] {
        &self.active_tools
    }

    /// Whether older messages may still be fetched
    pub fn has_more_messages(&self) -> bool {
        self.has_more_messages
    }

    /// Whether a pagination fetch is in flight
    pub fn is_loading_more(&self) -> bool {
        self.is_loading_more
    }

    /// The "request pending" indicator of the open turn
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Phase of the current turn
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Returns true from the start of a send until its message is finalized
    pub fn is_turn_open(&self) -> bool {
        self.phase != TurnPhase::Idle
    }

    /// Number of tool names with stashed citations
    pub fn pending_source_count(&self) -> usize {
        self.pending_sources.len()
    }

    /// Ids of the loaded window
    pub fn message_ids(&self) -> HashSet<&str> {
        self.messages.iter().map(|m| m.id.as_str()).collect()
    }

    /// Pagination cursor: the oldest server-confirmed message id
    pub fn cursor(&self) -> Option<&str> {
        self.messages
            .iter()
            .map(|m| m.id.as_str())
            .find(|id| !is_local_id(id))
    }

    /// Stamps a new window refresh; later stamps supersede earlier ones
    pub fn next_refresh(&mut self) -> u64 {
        self.refresh_issued += 1;
        self.refresh_issued
    }

    /// Returns true if a refresh stamped `generation` may still be applied
    pub fn accepts_refresh(&self, generation: u64) -> bool {
        generation > self.refresh_applied
    }

    /// Mints a fresh id for an optimistic record
    pub fn next_local_id(&mut self) -> String {
        self.local_ids.next_id()
    }

    /// Opens a turn: resets transient state and appends the user's message
    pub fn open_turn(&mut self, user_message: Message) {
        self.reset_transient();
        self.messages.push(user_message);
        self.is_loading = true;
        self.received_token = false;
        self.phase = TurnPhase::AwaitingFirstToken;
    }

    /// Moves the turn to `Terminal`, failing tools that never finished
    ///
    /// When no content arrived, `message` becomes the reply text.
    pub(crate) fn fail_turn(&mut self, message: &str) {
        if !self.received_token {
            self.streaming_buffer = message.to_string();
        }
        for tool in self
            .active_tools
            .iter_mut()
            .filter(|t| t.status == ToolStatus::Started)
        {
            tool.transition(ToolStatus::Failed);
        }
        self.enter_terminal();
    }

    /// Moves the turn to `Terminal` and clears the pending indicator
    pub(crate) fn enter_terminal(&mut self) {
        self.is_loading = false;
        self.phase = TurnPhase::Terminal;
    }

    /// Lowers `has_more_messages`; it never goes back up
    pub(crate) fn update_has_more(&mut self, has_more: bool) {
        self.has_more_messages = self.has_more_messages && has_more;
    }

    /// Clears the per-turn buffers
    pub(crate) fn reset_transient(&mut self) {
        self.streaming_buffer.clear();
        self.active_tools.clear();
        self.pending_sources.clear();
    }
}
