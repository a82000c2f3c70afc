//! Message read-side commands.
//!
//! `watch` follows new rows through the database change feed and falls back
//! to polling `recent` when the feed cannot be opened.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chainchat_core::db::Database;
use chainchat_core::fanout::{PgChangeFeed, RealtimeFanout};
use chainchat_core::message::{ChatMessage, MessageKey};
use chainchat_core::sink::{MessageSink, PgMessageSink};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum MessageCommands {
    /// Show the most recent stored messages, oldest first
    Recent {
        /// Maximum number of messages
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print new messages as they are stored (Ctrl-C to stop)
    Watch {
        /// Polling interval used when the change feed is unavailable
        #[arg(long, default_value = "1000")]
        poll_ms: u64,
    },
}

// ── Display types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Tabled)]
struct MessageRow {
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Sender")]
    sender: String,
    #[tabled(rename = "Text")]
    text: String,
    #[tabled(rename = "Digest")]
    source_digest: String,
    #[tabled(rename = "Seq")]
    sequence: u64,
}

impl From<ChatMessage> for MessageRow {
    fn from(m: ChatMessage) -> Self {
        Self {
            created_at: m.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            sender: output::short_address(&m.sender_address),
            text: m.text,
            source_digest: m.source_digest,
            sequence: m.sequence,
        }
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: MessageCommands, path: Option<&str>, format: OutputFormat) -> Result<()> {
    let config = super::load_config(path)?;
    let db = Database::connect(&config.database)
        .await
        .context("Failed to connect to database")?;

    match cmd {
        MessageCommands::Recent { limit } => {
            let sink = PgMessageSink::new(db.pool().clone());
            let messages = sink.recent(limit).await.context("Failed to read messages")?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<MessageRow> = messages.into_iter().map(MessageRow::from).collect();
                    output::print_list(&rows, format)?;
                }
                _ => output::print_item(&messages, format)?,
            }
        }

        MessageCommands::Watch { poll_ms } => {
            let fanout = Arc::new(RealtimeFanout::new());
            let subscription =
                fanout.subscribe(move |message| output::print_message_line(message, format));

            match PgChangeFeed::connect(db.pool(), config.fanout.channel.as_str(), fanout.clone())
                .await
            {
                Ok(feed) => {
                    output::print_info(&format!(
                        "Watching '{}' (Ctrl-C to stop)",
                        config.fanout.channel
                    ));
                    let token = CancellationToken::new();
                    let handle = tokio::spawn(feed.run(token.clone()));

                    tokio::signal::ctrl_c()
                        .await
                        .context("Failed to listen for Ctrl-C")?;

                    fanout.unsubscribe(subscription);
                    token.cancel();
                    let _ = handle.await;
                }
                Err(e) => {
                    fanout.unsubscribe(subscription);
                    output::print_info(&format!(
                        "Change feed unavailable ({}); polling every {} ms",
                        e, poll_ms
                    ));
                    let sink = PgMessageSink::new(db.pool().clone());
                    poll_recent(&sink, poll_ms, format).await?;
                }
            }
        }
    }

    Ok(())
}

/// Poll the newest rows, printing each key once.
async fn poll_recent(sink: &PgMessageSink, poll_ms: u64, format: OutputFormat) -> Result<()> {
    const WINDOW: usize = 100;

    let mut seen: HashSet<MessageKey> = sink
        .recent(WINDOW)
        .await
        .context("Failed to read messages")?
        .iter()
        .map(ChatMessage::key)
        .collect();

    let mut interval = tokio::time::interval(Duration::from_millis(poll_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => {
                match sink.recent(WINDOW).await {
                    Ok(messages) => {
                        for message in messages {
                            if seen.insert(message.key()) {
                                output::print_message_line(&message, format);
                            }
                        }
                    }
                    Err(e) => output::print_error(&format!("Poll failed: {}", e)),
                }
            }
        }
    }

    Ok(())
}
