use std::path::PathBuf;

use crate::commands::{build_engine, run_turn};
use crate::config::Config;
use crate::error::Result;
use crate::models::{OutgoingAttachment, OutgoingMessage};

/// Send one message and stream the reply to stdout
pub async fn handle_send(
    config: &Config,
    chat_id: &str,
    text: String,
    files: Vec<PathBuf>,
) -> Result<()> {
    let mut message = OutgoingMessage::text(text);
    for path in &files {
        message = message.with_attachment(OutgoingAttachment::from_path(path).await?);
    }

    let engine = build_engine(config)?;
    engine.select_chat(chat_id).await?;

    tracing::debug!(chat_id, files = files.len(), "Sending message");
    run_turn(&engine, message).await
}
