//! Cursor slot in Redis.

use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use tracing::info;

use super::{CursorRecord, CursorStore};
use crate::error::{ErrorCode, IngestError, Result};

/// One key per poller holding the JSON [`CursorRecord`].
///
/// A single `SET` replaces the whole value, which is what makes writes atomic.
#[derive(Clone)]
pub struct RedisCursorStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisCursorStore {
    /// Connect and verify the server answers.
    pub async fn connect(url: &str, key_prefix: &str, poller_id: &str) -> Result<Self> {
        let client = ::redis::Client::open(url).map_err(|e| {
            IngestError::with_internal(
                ErrorCode::CacheConnectionFailed,
                "Failed to create Redis client",
                e.to_string(),
            )
        })?;

        let mut conn = ConnectionManager::new(client).await?;
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;

        info!(url = %url, "Redis cursor store connected");

        Ok(Self {
            conn,
            key: Self::key_for(key_prefix, poller_id),
        })
    }

    pub fn key_for(key_prefix: &str, poller_id: &str) -> String {
        format!("{}:{}", key_prefix.trim_end_matches(':'), poller_id)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl CursorStore for RedisCursorStore {
    async fn load_record(&self) -> Result<Option<CursorRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&self.key)
            .await
            .map_err(|e| IngestError::from_cache(e, ErrorCode::CursorReadFailed))?;

        match raw {
            Some(json) => {
                let record = serde_json::from_str(&json)
                    .map_err(|e| IngestError::cursor_corrupt(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn store_record(&self, record: &CursorRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.key, json)
            .await
            .map_err(|e| IngestError::from_cache(e, ErrorCode::CursorPersistFailed))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_for() {
        assert_eq!(RedisCursorStore::key_for("chainchat:cursor", "main"), "chainchat:cursor:main");
        assert_eq!(RedisCursorStore::key_for("chainchat:cursor:", "main"), "chainchat:cursor:main");
    }
}
