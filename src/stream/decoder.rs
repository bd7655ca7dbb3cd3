//! Line-framed event stream decoder
//!
//! The backend writes one frame per line, each prefixed with `data:`. Chunks
//! arrive with arbitrary boundaries, so an unterminated trailing line is held
//! back and completed by the next chunk. Lines without the prefix are ignored.
//!
//! Payload handling:
//!
//! - `[DONE]` ends decoding; anything buffered after it is discarded.
//! - A JSON object matching [`ChatEvent`] becomes [`Frame::Event`].
//! - A JSON object of any other shape becomes [`Frame::Unrecognized`].
//! - Anything else is kept verbatim as [`Frame::Text`].

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::Result;
use crate::stream::events::ChatEvent;

/// Sentinel payload that terminates a stream
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// One decoded `data:` frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed typed event
    Event(ChatEvent),
    /// Payload that is not JSON; treated as literal reply text
    Text(String),
    /// A JSON object with an unknown or invalid shape
    Unrecognized(serde_json::Value),
    /// The `[DONE]` sentinel
    Done,
}

/// Incremental decoder for line-framed event streams
///
/// # Examples
///
/// ```
/// use chatline::stream::{ChatEvent, Frame, FrameDecoder};
///
/// let mut decoder = FrameDecoder::new();
/// assert!(decoder.feed(b"data: {\"type\":\"token\",\"con").is_empty());
/// let frames = decoder.feed(b"tent\":\"Hi\"}\n");
/// assert_eq!(frames, vec![Frame::Event(ChatEvent::Token { content: "Hi".into() })]);
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    /// Creates an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every frame completed by it
    ///
    /// Bytes are buffered rather than decoded eagerly so multi-byte UTF-8
    /// sequences split across chunks survive intact.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }

        self.pending.extend_from_slice(chunk);

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let Some(frame) = decode_line(&line[..line.len() - 1]) else {
                continue;
            };
            let done = frame == Frame::Done;
            frames.push(frame);
            if done {
                self.finish_now();
                break;
            }
        }

        frames
    }

    /// Flushes the trailing unterminated line once the stream has closed
    pub fn finish(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        self.finished = true;
        decode_line(&line)
    }

    /// Returns true after the sentinel was seen or [`finish`](Self::finish) ran
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of buffered bytes belonging to an incomplete line
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }

    fn finish_now(&mut self) {
        self.finished = true;
        self.pending.clear();
    }
}

/// Decodes one line (without its newline) into a frame, if it carries one
///
/// Only the single space after `data:` and a trailing `\r` are framing;
/// literal text keeps any other surrounding whitespace.
fn decode_line(raw: &[u8]) -> Option<Frame> {
    let text = String::from_utf8_lossy(raw);
    let line = text.strip_suffix('\r').unwrap_or(text.as_ref());
    let rest = line.trim_start().strip_prefix(DATA_PREFIX)?;
    let payload = rest.strip_prefix(' ').unwrap_or(rest);
    let trimmed = payload.trim();

    if trimmed.is_empty() {
        return None;
    }
    if trimmed == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    match serde_json::from_str::<ChatEvent>(trimmed) {
        Ok(event) => Some(Frame::Event(event)),
        Err(_) => match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value @ serde_json::Value::Object(_)) => Some(Frame::Unrecognized(value)),
            _ => Some(Frame::Text(payload.to_string())),
        },
    }
}

struct DecodeState<S> {
    bytes: S,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    exhausted: bool,
}

/// Adapts a byte stream into a stream of frames
///
/// The byte stream is not polled again once the sentinel has been decoded.
/// A transport error is yielded once and ends the frame stream.
pub fn decode_stream<S>(bytes: S) -> impl Stream<Item = Result<Frame>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = DecodeState {
        bytes,
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.exhausted || state.decoder.is_finished() {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.ready.extend(state.decoder.feed(&chunk)),
                Some(Err(e)) => {
                    state.exhausted = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.exhausted = true;
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    })
}
