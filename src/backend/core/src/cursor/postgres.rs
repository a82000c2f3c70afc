//! Cursor slot in PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{CursorRecord, CursorStore};
use crate::error::{ErrorCode, IngestError, Result};

/// One row per poller in `poller_cursors`.
///
/// Writes are a single upsert statement, so a concurrent reader sees either
/// the old row or the new one.
#[derive(Clone)]
pub struct PgCursorStore {
    pool: PgPool,
    poller_id: String,
}

impl PgCursorStore {
    pub fn new(pool: PgPool, poller_id: impl Into<String>) -> Self {
        Self {
            pool,
            poller_id: poller_id.into(),
        }
    }

    pub fn poller_id(&self) -> &str {
        &self.poller_id
    }
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    cursor: String,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load_record(&self) -> Result<Option<CursorRecord>> {
        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            SELECT cursor, updated_at
            FROM poller_cursors
            WHERE poller_id = $1
            "#,
        )
        .bind(&self.poller_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::from_database(e, ErrorCode::CursorReadFailed))?;

        Ok(row.map(|r| CursorRecord {
            cursor: r.cursor,
            updated_at: r.updated_at,
        }))
    }

    async fn store_record(&self, record: &CursorRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO poller_cursors (poller_id, cursor, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (poller_id) DO UPDATE SET
                cursor = EXCLUDED.cursor,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&self.poller_id)
        .bind(&record.cursor)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::from_database(e, ErrorCode::CursorPersistFailed))?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
