//! Cursor inspection commands.

use anyhow::{Context, Result};
use chainchat_core::config::CursorBackend;
use chainchat_core::cursor;
use chainchat_core::db::Database;
use clap::Subcommand;
use serde_json::json;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum CursorCommands {
    /// Show the stored read position for the configured poller
    Show,
}

pub async fn execute(cmd: CursorCommands, path: Option<&str>, format: OutputFormat) -> Result<()> {
    match cmd {
        CursorCommands::Show => show(path, format).await,
    }
}

async fn show(path: Option<&str>, format: OutputFormat) -> Result<()> {
    let config = super::load_config(path)?;

    if config.cursor.backend == CursorBackend::Memory {
        output::print_info("Cursor backend is 'memory'; nothing survives the ingest process");
        return Ok(());
    }

    let db = Database::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    let store = cursor::open_store(&config, db.pool())
        .await
        .context("Failed to open cursor store")?;

    let record = store
        .load_record()
        .await
        .context("Failed to read cursor")?;

    let Some(record) = record else {
        match format {
            OutputFormat::Table => output::print_info(&format!(
                "No cursor stored for poller '{}'; the next run starts from the beginning",
                config.poller.poller_id
            )),
            _ => output::print_item(
                &json!({ "poller_id": config.poller.poller_id, "cursor": null }),
                format,
            )?,
        }
        return Ok(());
    };

    let decoded = record.decode().context("Stored cursor is corrupt")?;

    match format {
        OutputFormat::Table => {
            output::print_header("Cursor");
            output::print_detail("Poller", &config.poller.poller_id);
            output::print_detail("Backend", store.name());
            output::print_detail("Transaction", &decoded.tx_digest);
            output::print_detail("Event seq", &decoded.event_seq.to_string());
            output::print_detail("Encoded", &record.cursor);
            output::print_detail(
                "Updated",
                &record.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            );
        }
        _ => output::print_item(
            &json!({
                "poller_id": config.poller.poller_id,
                "backend": store.name(),
                "cursor": decoded,
                "encoded": record.cursor,
                "updated_at": record.updated_at,
            }),
            format,
        )?,
    }

    Ok(())
}
