//! Event dispatcher
//!
//! Applies decoded frames to the open turn of a [`Session`]. Frames are
//! applied strictly in arrival order; once the turn reaches
//! [`TurnPhase::Terminal`] every further frame is ignored.

use crate::models::{ToolCall, ToolStatus};
use crate::session::state::{Session, TurnPhase};
use crate::stream::{ChatEvent, Frame};

/// Observable effect of applying one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Text was appended to the streaming buffer
    Appended(String),
    /// A tool entry was created or changed
    ToolUpdated(ToolCall),
    /// The server renamed a chat; the turn is unaffected
    TitleUpdated {
        /// Renamed chat
        chat_id: String,
        /// New title
        title: String,
    },
    /// The turn ended
    Terminal,
    /// Nothing changed
    Ignored,
}

/// Applies one frame to the session's open turn
///
/// # Examples
///
/// ```
/// use chatline::models::Message;
/// use chatline::session::{apply_frame, Dispatch, Session, TurnPhase};
/// use chatline::stream::{ChatEvent, Frame};
///
/// let mut session = Session::new("chat-1", 1, 8);
/// session.open_turn(Message::user("local-1", "hi"));
///
/// let effect = apply_frame(&mut session, Frame::Event(ChatEvent::Token { content: "Hello".into() }));
/// assert_eq!(effect, Dispatch::Appended("Hello".into()));
/// assert_eq!(session.phase(), TurnPhase::Streaming);
/// assert!(!session.is_loading());
/// ```
pub fn apply_frame(session: &mut Session, frame: Frame) -> Dispatch {
    if !session.phase.accepts_frames() {
        tracing::debug!(
            chat_id = %session.chat_id,
            phase = ?session.phase,
            "ignoring frame outside an open turn"
        );
        return Dispatch::Ignored;
    }

    match frame {
        Frame::Event(event) => apply_event(session, event),
        Frame::Text(text) => {
            tracing::debug!(chat_id = %session.chat_id, "non-JSON frame appended as text");
            append_token(session, text)
        }
        Frame::Unrecognized(value) => {
            tracing::debug!(chat_id = %session.chat_id, payload = %value, "ignoring unrecognized event");
            Dispatch::Ignored
        }
        Frame::Done => {
            session.enter_terminal();
            Dispatch::Terminal
        }
    }
}

fn apply_event(session: &mut Session, event: ChatEvent) -> Dispatch {
    tracing::trace!(chat_id = %session.chat_id, kind = event.kind(), "applying event");
    match event {
        ChatEvent::Token { content } => append_token(session, content),
        ChatEvent::ToolStart { name } => {
            let mut tool = ToolCall::started(name);
            if let Some(citations) = session.pending_sources.take(&tool.name) {
                tool.attach_citations(citations);
            }
            session.active_tools.push(tool.clone());
            Dispatch::ToolUpdated(tool)
        }
        ChatEvent::ToolEnd { name } => match latest_started(session, &name) {
            Some(tool) => {
                tool.transition(ToolStatus::Completed);
                Dispatch::ToolUpdated(tool.clone())
            }
            None => {
                tracing::debug!(chat_id = %session.chat_id, tool = %name, "tool_end without a started entry");
                Dispatch::Ignored
            }
        },
        ChatEvent::Source { name, citations } => match latest_started(session, &name) {
            Some(tool) => {
                tool.attach_citations(citations);
                Dispatch::ToolUpdated(tool.clone())
            }
            None => {
                session.pending_sources.stash(&name, citations);
                Dispatch::Ignored
            }
        },
        ChatEvent::TitleUpdate { chat_id, title } => Dispatch::TitleUpdated { chat_id, title },
        ChatEvent::Error { content } => {
            tracing::debug!(chat_id = %session.chat_id, "turn failed on the server");
            session.fail_turn(&content);
            Dispatch::Terminal
        }
        ChatEvent::Done => {
            session.enter_terminal();
            Dispatch::Terminal
        }
    }
}

fn append_token(session: &mut Session, content: String) -> Dispatch {
    session.streaming_buffer.push_str(&content);
    session.received_token = true;
    session.is_loading = false;
    session.phase = TurnPhase::Streaming;
    Dispatch::Appended(content)
}

/// Most recently started entry for `name` that has not finished yet
fn latest_started<'a>(session: &'a mut Session, name: &str) -> Option<&'a mut ToolCall> {
    session
        .active_tools
        .iter_mut()
        .rev()
        .find(|t| t.name == name && t.status == ToolStatus::Started)
}
