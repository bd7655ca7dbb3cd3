//! Command-line interface definition for Chatline
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for chat management, history paging, one-shot sends,
//! and an interactive session.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chatline - terminal client for streaming chat backends
///
/// Talks to a chat service over HTTP, streams assistant replies as they
/// arrive, and pages backward through chat history.
#[derive(Parser, Debug, Clone)]
#[command(name = "chatline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Chat service base URL (overrides config)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Bearer token for the chat service (overrides config)
    #[arg(long)]
    pub token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Chatline
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Manage chats
    Chats {
        /// Chat management subcommand
        #[command(subcommand)]
        command: ChatCommand,
    },

    /// Print a chat's history, oldest first
    History {
        /// Chat to print
        chat_id: String,

        /// Older pages to load beyond the latest one
        #[arg(short, long, default_value_t = 0)]
        pages: usize,
    },

    /// Send one message and stream the reply to stdout
    Send {
        /// Chat to post into
        chat_id: String,

        /// Message text
        text: String,

        /// Files to attach (repeatable)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
    },

    /// Start an interactive session in a chat
    Chat {
        /// Chat to open
        chat_id: String,
    },
}

/// Chat management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ChatCommand {
    /// List chats, most recently active first
    List,

    /// Create a chat
    Create {
        /// Optional title; the service picks one when omitted
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Rename a chat
    Rename {
        /// Chat to rename
        chat_id: String,

        /// New title
        title: String,
    },

    /// Delete a chat and its messages
    Delete {
        /// Chat to delete
        chat_id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
