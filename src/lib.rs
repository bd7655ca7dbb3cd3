//! Chatline - streaming chat session engine
//!
//! This library provides the client-side engine for chat backends that
//! stream replies as line-framed events: decoding the stream, assembling the
//! reply and its tool activity, reconciling optimistic state with the
//! server, and paging backward through history.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `stream`: Line-framed event decoding and the typed wire events
//! - `session`: Session state, the event dispatcher, reconciliation and pagination
//! - `client`: Backend trait and the HTTP implementation
//! - `engine`: The shared session engine tying the pieces together
//! - `models`: Messages, tool calls, attachments and chat summaries
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`, `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatline::{ChatEngine, Config, HttpChatBackend, OutgoingMessage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let backend = Arc::new(HttpChatBackend::new(&config.server)?);
//!     let engine = ChatEngine::new(backend, config.session.clone());
//!     engine.select_chat("665f1c2a").await?;
//!
//!     let report = engine.send(OutgoingMessage::text("Hello")).await?;
//!     println!("{}", report.message.content);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod session;
pub mod stream;

// Re-export commonly used types
pub use client::{ChatBackend, HttpChatBackend};
pub use config::Config;
pub use engine::{ChatEngine, SessionNotice, TurnOutcome, TurnReport};
pub use error::{ChatlineError, Result};
pub use models::{Message, OutgoingAttachment, OutgoingMessage};
pub use session::{PageOutcome, Session};
