//! Turn finalization and reconciliation
//!
//! When a turn ends, the streamed reply is committed to the window as an
//! optimistic assistant message under a local id. Once the server's latest
//! page arrives, optimistic records are dropped in favour of the server's
//! copies.

use std::collections::HashSet;

use crate::models::{Message, MessagePage};
use crate::session::state::{is_local_id, Session, TurnPhase};

/// Result of adopting a server page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Optimistic records removed from the window
    pub dropped_local: usize,
    /// Older server records kept ahead of the refreshed page
    pub retained: usize,
    /// Window size afterwards
    pub total: usize,
}

/// Commits the open turn as an optimistic assistant message
///
/// Clears the streaming buffer, the tool list, and the pending-source table,
/// and closes the turn. Returns the appended message.
///
/// # Examples
///
/// ```
/// use chatline::models::{Message, Role};
/// use chatline::session::{finalize_turn, Session, TurnPhase};
///
/// let mut session = Session::new("chat-1", 1, 8);
/// session.open_turn(Message::user("local-1", "hi"));
///
/// let reply = finalize_turn(&mut session);
/// assert_eq!(reply.role, Role::Assistant);
/// assert_eq!(session.phase(), TurnPhase::Idle);
/// assert_eq!(session.messages().len(), 2);
/// ```
pub fn finalize_turn(session: &mut Session) -> Message {
    let id = session.next_local_id();
    let content = std::mem::take(&mut session.streaming_buffer);
    let tools = std::mem::take(&mut session.active_tools);
    let message = Message::assistant(id, content, tools);

    session.messages.push(message.clone());
    session.reset_transient();
    session.is_loading = false;
    session.received_token = false;
    session.phase = TurnPhase::Idle;

    message
}

/// Replaces the window with the server's latest page
///
/// `generation` is the stamp from [`Session::next_refresh`] taken when the
/// refresh was issued. A page whose stamp is not newer than the last applied
/// one is dropped and `None` is returned, so a slow refresh can never undo a
/// later one.
///
/// The server copy wins for every id it contains. Optimistic local records
/// are discarded. Previously paginated server messages are kept ahead of the
/// page only when strictly older than its first entry. `has_more_messages` is
/// left untouched.
pub fn reconcile_window(
    session: &mut Session,
    generation: u64,
    page: MessagePage,
) -> Option<ReconcileSummary> {
    if !session.accepts_refresh(generation) {
        return None;
    }
    session.refresh_applied = generation;

    let mut seen = HashSet::new();
    let fresh: Vec<Message> = page
        .messages
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();
    let boundary = fresh.first().map(|m| m.created_at);

    let previous = std::mem::take(&mut session.messages);
    let mut dropped_local = 0;
    let mut window: Vec<Message> = Vec::with_capacity(previous.len() + fresh.len());

    for message in previous {
        if is_local_id(&message.id) {
            dropped_local += 1;
        } else if !seen.contains(&message.id)
            && boundary.map_or(true, |first| message.created_at < first)
        {
            window.push(message);
        }
    }
    let retained = window.len();
    window.extend(fresh);

    session.messages = window;

    Some(ReconcileSummary {
        dropped_local,
        retained,
        total: session.messages.len(),
    })
}
