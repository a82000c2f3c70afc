//! Message sink on the `chat_messages` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{InsertOutcome, MessageSink};
use crate::error::{ErrorCode, IngestError, Result};
use crate::message::ChatMessage;

/// Inserts through `ON CONFLICT (source_digest, sequence) DO NOTHING`, so the
/// unique constraint is what makes repeated inserts harmless.
#[derive(Clone)]
pub struct PgMessageSink {
    pool: PgPool,
}

impl PgMessageSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    source_digest: String,
    sequence: i64,
    created_at: DateTime<Utc>,
    sender_address: String,
    message_text: String,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = IngestError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let sequence = u64::try_from(row.sequence).map_err(|_| {
            IngestError::new(ErrorCode::DeserializationError, "Negative sequence in stored message")
        })?;

        Ok(ChatMessage {
            source_digest: row.source_digest,
            sequence,
            created_at: row.created_at,
            sender_address: row.sender_address,
            text: row.message_text,
        })
    }
}

#[async_trait]
impl MessageSink for PgMessageSink {
    async fn insert(&self, message: &ChatMessage) -> Result<InsertOutcome> {
        message.validate()?;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO chat_messages (source_digest, sequence, created_at, sender_address, message_text)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_digest, sequence) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&message.source_digest)
        .bind(message.sequence as i64)
        .bind(message.created_at)
        .bind(&message.sender_address)
        .bind(&message.text)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match IngestError::database_code(&e) {
            ErrorCode::DatabaseError => IngestError::from_database(e, ErrorCode::InsertFailed),
            _ => IngestError::from(e),
        })?;

        Ok(match inserted {
            Some(_) => InsertOutcome::Inserted,
            None => InsertOutcome::AlreadyPresent,
        })
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT source_digest, sequence, created_at, sender_address, message_text
            FROM (
                SELECT id, source_digest, sequence, created_at, sender_address, message_text
                FROM chat_messages
                ORDER BY id DESC
                LIMIT $1
            ) newest
            ORDER BY id ASC
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
