//! Chatline - terminal client for streaming chat backends
//!
#![doc = "Chatline - terminal client for streaming chat backends"]
#![doc = "Main entry point for the Chatline CLI."]

use anyhow::Result;

use chatline::cli::{Cli, Commands};
use chatline::commands;
use chatline::config::Config;
use chatline::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli
        .config
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path, &cli)?;

    // Initialize tracing
    init_logging(&config.logging)?;
    tracing::debug!(path = %config_path.display(), "Configuration loaded");

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Chats { command } => {
            tracing::info!("Starting chat management command");
            commands::chats::handle_chats(&config, command).await?;
            Ok(())
        }
        Commands::History { chat_id, pages } => {
            tracing::info!("Starting history command");
            commands::history::handle_history(&config, &chat_id, pages).await?;
            Ok(())
        }
        Commands::Send {
            chat_id,
            text,
            files,
        } => {
            tracing::info!("Starting one-shot send");
            commands::send::handle_send(&config, &chat_id, text, files).await?;
            Ok(())
        }
        Commands::Chat { chat_id } => {
            commands::chat::run_chat(config, chat_id).await?;
            Ok(())
        }
    }
}
