use crate::commands::{build_engine, print_message};
use crate::config::Config;
use crate::error::Result;
use crate::session::PageOutcome;
use colored::Colorize;

/// Print a chat's latest page plus up to `pages` older pages
pub async fn handle_history(config: &Config, chat_id: &str, pages: usize) -> Result<()> {
    let engine = build_engine(config)?;
    engine.select_chat(chat_id).await?;

    let mut loaded = 0;
    for _ in 0..pages {
        match engine.load_older().await? {
            PageOutcome::Merged { has_more, .. } => {
                loaded += 1;
                if !has_more {
                    break;
                }
            }
            PageOutcome::Exhausted | PageOutcome::Skipped(_) => break,
        }
    }
    tracing::debug!(chat_id, pages = loaded, "Loaded older pages");

    let Some(session) = engine.snapshot().await else {
        return Ok(());
    };

    if session.messages().is_empty() {
        println!("{}", "No messages in this chat.".yellow());
        return Ok(());
    }

    if session.has_more_messages() {
        println!(
            "{}",
            "(older messages not shown; use --pages to load more)".dimmed()
        );
        println!();
    }
    for message in session.messages() {
        print_message(message);
    }

    Ok(())
}
