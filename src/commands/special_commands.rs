//! Special commands parser for the interactive session
//!
//! Lines starting with `/` control the session instead of being sent as a
//! message. Command names are case-insensitive; arguments are kept verbatim.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },

    /// Command takes no argument but one was given
    #[error("Command {command} takes no argument, got: {arg}")]
    UnexpectedArgument { command: String, arg: String },
}

/// Special commands available in the interactive session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Load the page of messages older than the window
    LoadOlder,

    /// Select another chat
    Switch(String),

    /// List chats
    ListChats,

    /// Create a chat and switch to it
    NewChat(Option<String>),

    /// Rename the current chat
    Rename(String),

    /// Queue a file for the next message
    Attach(PathBuf),

    /// Drop queued files
    ClearAttachments,

    /// Print the loaded window again
    Show,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; send the line as a message
    None,
}

/// Parse a user input line into a special command
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands and missing or unexpected
/// arguments.
///
/// # Examples
///
/// ```
/// use chatline::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/more").unwrap(), SpecialCommand::LoadOlder);
/// assert_eq!(
///     parse_special_command("/switch 665f1c2a").unwrap(),
///     SpecialCommand::Switch("665f1c2a".to_string())
/// );
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return Ok(SpecialCommand::None);
    }

    let (name, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.to_lowercase(), Some(rest.trim()).filter(|a| !a.is_empty())),
        None => (trimmed.to_lowercase(), None),
    };

    let no_arg = |command: SpecialCommand| match arg {
        Some(extra) => Err(CommandError::UnexpectedArgument {
            command: name.clone(),
            arg: extra.to_string(),
        }),
        None => Ok(command),
    };
    let required = |usage: &str| {
        arg.map(str::to_string)
            .ok_or_else(|| CommandError::MissingArgument {
                command: name.clone(),
                usage: usage.to_string(),
            })
    };

    match name.as_str() {
        "/more" | "/older" => no_arg(SpecialCommand::LoadOlder),
        "/switch" | "/open" => required("/switch <CHAT_ID>").map(SpecialCommand::Switch),
        "/chats" | "/list" => no_arg(SpecialCommand::ListChats),
        "/new" => Ok(SpecialCommand::NewChat(arg.map(str::to_string))),
        "/title" | "/rename" => required("/title <NEW TITLE>").map(SpecialCommand::Rename),
        "/attach" => required("/attach <PATH>").map(|p| SpecialCommand::Attach(PathBuf::from(p))),
        "/detach" => no_arg(SpecialCommand::ClearAttachments),
        "/show" => no_arg(SpecialCommand::Show),
        "/help" | "/?" => no_arg(SpecialCommand::Help),
        "/quit" | "/exit" | "/q" => no_arg(SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(name.clone())),
    }
}

/// Print the list of special commands
pub fn print_help() {
    println!(
        r#"
Special Commands
================

HISTORY:
  /more            - Load older messages
  /show            - Print the loaded messages again

CHATS:
  /chats           - List chats
  /switch <ID>     - Open another chat
  /new [title]     - Create a chat and open it
  /title <title>   - Rename the current chat

ATTACHMENTS:
  /attach <path>   - Attach a file to the next message
  /detach          - Drop attached files

SESSION:
  /help            - Show this help
  /quit            - Leave the session (also /exit, Ctrl-D)

Anything else is sent as a message.
"#
    );
}
