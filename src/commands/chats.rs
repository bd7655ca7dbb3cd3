use crate::cli::ChatCommand;
use crate::commands::build_engine;
use crate::config::Config;
use crate::error::Result;
use crate::models::ChatSummary;
use colored::Colorize;
use prettytable::{format, Table};

/// Handle chat management commands
pub async fn handle_chats(config: &Config, command: ChatCommand) -> Result<()> {
    let engine = build_engine(config)?;

    match command {
        ChatCommand::List => {
            let chats = engine.refresh_chats().await?;
            print_chat_table(&chats);
        }
        ChatCommand::Create { title } => {
            let chat = engine.create_chat(title.as_deref()).await?;
            println!(
                "{}",
                format!("Created chat {} \"{}\"", chat.id, chat.title).green()
            );
        }
        ChatCommand::Rename { chat_id, title } => {
            let chat = engine.rename_chat(&chat_id, &title).await?;
            println!(
                "{}",
                format!("Renamed chat {} to \"{}\"", chat.id, chat.title).green()
            );
        }
        ChatCommand::Delete { chat_id } => {
            engine.delete_chat(&chat_id).await?;
            println!("{}", format!("Deleted chat {}", chat_id).green());
        }
    }

    Ok(())
}

/// Print chats as a table, most recently active first
pub fn print_chat_table(chats: &[ChatSummary]) {
    if chats.is_empty() {
        println!("{}", "No chats found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Created".bold(),
        "Last Updated".bold()
    ]);

    for chat in chats {
        table.add_row(prettytable::row![
            chat.id.cyan(),
            truncate_title(&chat.title, 40),
            chat.created_at.format("%Y-%m-%d %H:%M").to_string(),
            chat.updated_at.format("%Y-%m-%d %H:%M").to_string()
        ]);
    }

    println!();
    table.printstd();
    println!();
    println!("Use {} to open a chat.", "chatline chat <ID>".cyan());
    println!();
}

fn truncate_title(title: &str, max: usize) -> String {
    if title.chars().count() > max {
        let kept: String = title.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        title.to_string()
    }
}
