//! Inbound event stream handling
//!
//! - [`events`]: the closed set of typed events the backend emits
//! - [`decoder`]: turns an incrementally delivered byte stream into frames

pub mod decoder;
pub mod events;

pub use decoder::{decode_stream, Frame, FrameDecoder, DONE_SENTINEL};
pub use events::ChatEvent;
