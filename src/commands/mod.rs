/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `chats`: List, create, rename and delete chats
- `history`: Print a chat's history with backward paging
- `send`: One-shot send with the reply streamed to stdout
- `chat`: Interactive session

Handlers are thin: they build a [`ChatEngine`] over the HTTP backend and
render what it reports.
*/

use std::io::Write;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::client::HttpChatBackend;
use crate::config::Config;
use crate::engine::{ChatEngine, SessionNotice, TurnOutcome};
use crate::error::{user_message_of, Result};
use crate::models::{Message, OutgoingMessage, Role, ToolStatus};

pub mod chats;
pub mod history;
pub mod send;
pub mod special_commands;

/// Builds an engine over the configured HTTP backend
pub fn build_engine(config: &Config) -> Result<ChatEngine> {
    let backend = HttpChatBackend::new(&config.server)?;
    Ok(ChatEngine::new(Arc::new(backend), config.session.clone()))
}

/// Prints one message of the window
pub fn print_message(message: &Message) {
    let stamp = message.created_at.format("%Y-%m-%d %H:%M");
    let who = match message.role {
        Role::User => "you".green().bold(),
        Role::Assistant => "assistant".cyan().bold(),
        Role::System => "system".yellow().bold(),
    };
    println!("{} {}", who, stamp.to_string().dimmed());

    for attachment in &message.attachments {
        println!(
            "  {} {} ({} bytes)",
            "📎".dimmed(),
            attachment.filename,
            attachment.size
        );
    }
    if !message.content.is_empty() {
        println!("{}", message.content);
    }
    for tool in &message.tool_calls {
        println!("  {}", tool_line(&tool.name, tool.status, tool.citations.as_deref()));
    }
    println!();
}

fn tool_line(name: &str, status: ToolStatus, citations: Option<&[String]>) -> String {
    let status = match status {
        ToolStatus::Started => "running".yellow(),
        ToolStatus::Completed => "done".green(),
        ToolStatus::Failed => "failed".red(),
    };
    let mut line = format!("[{} {}]", name, status);
    if let Some(citations) = citations.filter(|c| !c.is_empty()) {
        line.push_str(&format!(" {}", citations.join(", ").dimmed()));
    }
    line
}

/// Prints reply deltas as they arrive until the turn is committed
fn spawn_printer(mut notices: broadcast::Receiver<SessionNotice>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        loop {
            match notices.recv().await {
                Ok(SessionNotice::Delta { content, .. }) => {
                    print!("{}", content);
                    let _ = stdout.flush();
                }
                Ok(SessionNotice::ToolUpdated { tool, .. }) => {
                    eprintln!(
                        "{}",
                        tool_line(&tool.name, tool.status, tool.citations.as_deref())
                    );
                }
                Ok(SessionNotice::TitleUpdated { title, .. }) => {
                    eprintln!("{}", format!("Chat renamed to \"{}\"", title).dimmed());
                }
                Ok(SessionNotice::Unauthorized) => {
                    eprintln!("{}", "The chat service rejected your token.".red());
                }
                Ok(SessionNotice::TurnFinished { .. }) => {
                    println!();
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Display fell behind the reply stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Sends one message and renders the streamed reply
pub(crate) async fn run_turn(engine: &ChatEngine, message: OutgoingMessage) -> Result<()> {
    let printer = spawn_printer(engine.subscribe());

    match engine.send(message).await {
        Ok(report) => {
            let _ = printer.await;
            match report.outcome {
                TurnOutcome::Completed | TurnOutcome::Closed => {}
                TurnOutcome::Failed(text) => {
                    if report.message.content == text {
                        println!("{}", text.red());
                    } else {
                        println!("{}", format!("Reply stopped: {}", text).red());
                    }
                }
                TurnOutcome::Interrupted(_) => {
                    println!(
                        "{}",
                        "Connection lost; the reply may be incomplete.".red()
                    );
                }
            }
            Ok(())
        }
        Err(error) => {
            printer.abort();
            println!("{}", user_message_of(&error).red());
            Err(error)
        }
    }
}

// Interactive session handler
pub mod chat {
    //! Interactive session handler.
    //!
    //! Opens a chat, prints its latest page, and runs a readline loop that
    //! sends each line as a message. Special commands page history, switch
    //! chats and attach files.

    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use super::*;
    use crate::models::OutgoingAttachment;
    use crate::session::PageOutcome;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Start the interactive session
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration
    /// * `chat_id` - Chat to open first
    pub async fn run_chat(config: Config, chat_id: String) -> Result<()> {
        tracing::info!(chat_id = %chat_id, "Starting interactive session");

        let engine = build_engine(&config)?;
        if let Err(e) = engine.refresh_chats().await {
            tracing::debug!("Could not load chat list: {}", e);
        }
        open_chat(&engine, &chat_id).await?;

        let mut rl = DefaultEditor::new()?;
        let mut attachments: Vec<OutgoingAttachment> = Vec::new();

        println!(
            "{}",
            "Type a message, /more for older messages, /help for commands.".dimmed()
        );

        loop {
            let prompt = prompt_for(&engine, attachments.len()).await;
            match rl.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(trimmed);

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}", e.to_string().red());
                            continue;
                        }
                    };

                    match command {
                        SpecialCommand::None => {
                            let mut message = OutgoingMessage::text(trimmed);
                            message.attachments = std::mem::take(&mut attachments);
                            if let Err(e) = run_turn(&engine, message).await {
                                tracing::debug!("Turn failed: {:#}", e);
                            }
                        }
                        SpecialCommand::LoadOlder => load_older(&engine).await,
                        SpecialCommand::Switch(id) => {
                            attachments.clear();
                            if let Err(e) = open_chat(&engine, &id).await {
                                eprintln!("{}", user_message_of(&e).red());
                            }
                        }
                        SpecialCommand::ListChats => match engine.refresh_chats().await {
                            Ok(chats) => super::chats::print_chat_table(&chats),
                            Err(e) => eprintln!("{}", user_message_of(&e).red()),
                        },
                        SpecialCommand::NewChat(title) => {
                            match engine.create_chat(title.as_deref()).await {
                                Ok(chat) => {
                                    attachments.clear();
                                    println!("{}", format!("Created chat {}", chat.id).green());
                                }
                                Err(e) => eprintln!("{}", user_message_of(&e).red()),
                            }
                        }
                        SpecialCommand::Rename(title) => {
                            let Some(id) = engine.active_chat_id().await else {
                                continue;
                            };
                            match engine.rename_chat(&id, &title).await {
                                Ok(chat) => println!("{}", format!("Renamed to \"{}\"", chat.title).green()),
                                Err(e) => eprintln!("{}", user_message_of(&e).red()),
                            }
                        }
                        SpecialCommand::Attach(path) => {
                            match OutgoingAttachment::from_path(&path).await {
                                Ok(attachment) => {
                                    println!(
                                        "{}",
                                        format!("Attached {} ({} bytes)", attachment.filename, attachment.size())
                                            .dimmed()
                                    );
                                    attachments.push(attachment);
                                }
                                Err(e) => eprintln!("{}", e.to_string().red()),
                            }
                        }
                        SpecialCommand::ClearAttachments => attachments.clear(),
                        SpecialCommand::Show => print_window(&engine).await,
                        SpecialCommand::Help => print_help(),
                        SpecialCommand::Exit => break,
                    }

                    if engine.active_chat_id().await.is_none() {
                        eprintln!("{}", "Session closed.".yellow());
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }
        }

        Ok(())
    }

    async fn open_chat(engine: &ChatEngine, chat_id: &str) -> Result<()> {
        engine.select_chat(chat_id).await?;
        print_window(engine).await;
        Ok(())
    }

    async fn print_window(engine: &ChatEngine) {
        let Some(session) = engine.snapshot().await else {
            return;
        };
        if session.has_more_messages() {
            println!("{}", "(older messages available: /more)".dimmed());
        }
        for message in session.messages() {
            print_message(message);
        }
    }

    async fn load_older(engine: &ChatEngine) {
        match engine.load_older().await {
            Ok(PageOutcome::Merged { added, has_more }) => {
                if let Some(session) = engine.snapshot().await {
                    println!("{}", format!("── {} older messages ──", added).dimmed());
                    for message in session.messages().iter().take(added) {
                        print_message(message);
                    }
                    if !has_more {
                        println!("{}", "(start of chat)".dimmed());
                    }
                }
            }
            Ok(PageOutcome::Exhausted) => println!("{}", "(start of chat)".dimmed()),
            Ok(PageOutcome::Skipped(reason)) => println!("{}", reason.to_string().dimmed()),
            Err(e) => eprintln!("{}", user_message_of(&e).red()),
        }
    }

    async fn prompt_for(engine: &ChatEngine, attached: usize) -> String {
        let chat_id = engine.active_chat_id().await.unwrap_or_default();
        let title = engine
            .chats()
            .await
            .into_iter()
            .find(|c| c.id == chat_id)
            .map(|c| c.title)
            .unwrap_or(chat_id);
        if attached > 0 {
            format!("[{} +{}] >> ", title, attached)
        } else {
            format!("[{}] >> ", title)
        }
    }
}
