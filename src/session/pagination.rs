//! Cursor-based backward pagination
//!
//! The oldest server-confirmed message id is the cursor. A fetch returns up
//! to `page_size` strictly older messages; anything already in the window is
//! dropped and the rest is prepended in the order returned. At most one fetch
//! is in flight per session.

use std::collections::HashSet;
use std::fmt;

use crate::models::MessagePage;
use crate::session::state::{is_local_id, Session};

/// Why a pagination trigger did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another fetch is still in flight
    InFlight,
    /// The server reported no older messages
    NoMoreMessages,
    /// Nothing server-confirmed is loaded yet, so there is no cursor
    NoCursor,
    /// The session was replaced while the fetch was in flight
    Superseded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InFlight => "a page is already loading",
            Self::NoMoreMessages => "no older messages",
            Self::NoCursor => "nothing loaded yet",
            Self::Superseded => "chat was switched",
        };
        write!(f, "{text}")
    }
}

/// Result of one pagination trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Older messages were prepended
    Merged {
        /// Messages added after deduplication
        added: usize,
        /// Whether more pages remain
        has_more: bool,
    },
    /// The server returned an empty page; pagination is over for this session
    Exhausted,
    /// The trigger was a no-op
    Skipped(SkipReason),
}

/// Claims the session's pagination slot
///
/// Returns the cursor to fetch before, or why the trigger must be dropped.
/// On success the in-flight flag is raised; [`merge_older_page`] or the
/// caller's failure path lowers it.
pub fn begin_page_load(session: &mut Session) -> Result<String, SkipReason> {
    if session.is_loading_more {
        return Err(SkipReason::InFlight);
    }
    if !session.has_more_messages {
        return Err(SkipReason::NoMoreMessages);
    }
    let cursor = session.cursor().ok_or(SkipReason::NoCursor)?.to_string();
    session.is_loading_more = true;
    Ok(cursor)
}

/// Prepends an older page, dropping ids already in the window
///
/// `has_more_messages` follows the server flag when present, otherwise
/// `returned >= page_size`. An empty page ends pagination for good.
///
/// # Examples
///
/// ```
/// use chatline::models::{Message, MessagePage};
/// use chatline::session::{merge_older_page, PageOutcome, Session};
///
/// let mut session = Session::new("chat-1", 1, 8);
/// let outcome = merge_older_page(&mut session, MessagePage { messages: vec![], has_more: None }, 10);
/// assert_eq!(outcome, PageOutcome::Exhausted);
/// assert!(!session.has_more_messages());
/// ```
pub fn merge_older_page(session: &mut Session, page: MessagePage, page_size: usize) -> PageOutcome {
    session.is_loading_more = false;

    let returned = page.messages.len();
    if returned == 0 {
        session.update_has_more(false);
        return PageOutcome::Exhausted;
    }

    let mut older: Vec<_> = {
        let existing = session.message_ids();
        let mut fresh = HashSet::new();
        page.messages
            .into_iter()
            .filter(|m| !existing.contains(m.id.as_str()) && fresh.insert(m.id.clone()))
            .collect()
    };
    let added = older.len();

    older.append(&mut session.messages);
    session.messages = older;

    session.update_has_more(page.has_more.unwrap_or(returned >= page_size));

    PageOutcome::Merged {
        added,
        has_more: session.has_more_messages,
    }
}

/// Installs the first page of a freshly selected chat
///
/// Optimistic records added while the page was loading stay after it.
pub fn apply_initial_page(session: &mut Session, page: MessagePage, page_size: usize) {
    let returned = page.messages.len();
    let mut seen = HashSet::new();
    let mut window: Vec<_> = page
        .messages
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();
    window.extend(
        std::mem::take(&mut session.messages)
            .into_iter()
            .filter(|m| is_local_id(&m.id)),
    );
    session.messages = window;
    session.update_has_more(page.has_more.unwrap_or(returned >= page_size));
}
