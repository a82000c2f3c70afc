//! Resumable read position into the event source.
//!
//! The poller reads the cursor once at startup and rewrites it only after a
//! batch has been durably persisted. Stores hold a single slot per poller;
//! writes are last-write-wins and never partially applied.
//!
//! - [`InMemoryCursorStore`]: process-local, for tests and dry runs
//! - [`PgCursorStore`]: one row per poller in `poller_cursors`
//! - [`RedisCursorStore`]: one key per poller

mod memory;
mod postgres;
mod redis;

pub use self::memory::InMemoryCursorStore;
pub use self::postgres::PgCursorStore;
pub use self::redis::RedisCursorStore;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;

use crate::config::{Config, CursorBackend};
use crate::error::{IngestError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Cursor
// ═══════════════════════════════════════════════════════════════════════════════

/// Position token issued by the ledger: the locator of the last event seen.
///
/// Opaque to the pipeline apart from equality. `None` in an `Option<Cursor>`
/// means "start from the beginning".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub tx_digest: String,
    #[serde(with = "string_or_number")]
    pub event_seq: u64,
}

impl Cursor {
    pub fn new(tx_digest: impl Into<String>, event_seq: u64) -> Self {
        Self {
            tx_digest: tx_digest.into(),
            event_seq,
        }
    }

    /// Encode to the opaque string stored by cursor stores.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a string produced by [`Cursor::encode`].
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded.trim())?;
        serde_json::from_slice(&bytes)
            .map_err(|e| IngestError::cursor_corrupt(e.to_string()).with_source(e))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_digest, self.event_seq)
    }
}

/// Ledgers commonly send `eventSeq` as a decimal string.
mod string_or_number {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Persistence record
// ═══════════════════════════════════════════════════════════════════════════════

/// What a cursor store actually holds: the encoded cursor plus its write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorRecord {
    pub cursor: String,
    pub updated_at: DateTime<Utc>,
}

impl CursorRecord {
    pub fn new(cursor: &Cursor) -> Result<Self> {
        Ok(Self {
            cursor: cursor.encode()?,
            updated_at: Utc::now(),
        })
    }

    pub fn decode(&self) -> Result<Cursor> {
        Cursor::decode(&self.cursor)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Persists the last successfully processed read position.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the raw record. `Ok(None)` is the expected "not found" state.
    async fn load_record(&self) -> Result<Option<CursorRecord>>;

    /// Replace the stored record in one atomic write.
    async fn store_record(&self, record: &CursorRecord) -> Result<()>;

    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Load and decode the stored cursor.
    async fn get(&self) -> Result<Option<Cursor>> {
        match self.load_record().await? {
            Some(record) => record.decode().map(Some),
            None => Ok(None),
        }
    }

    /// Persist a new cursor.
    async fn set(&self, cursor: &Cursor) -> Result<()> {
        let record = CursorRecord::new(cursor)?;
        self.store_record(&record).await
    }
}

/// Open the store selected by `cursor.backend` for `poller.poller_id`.
pub async fn open_store(config: &Config, pool: &PgPool) -> Result<Arc<dyn CursorStore>> {
    let poller_id = config.poller.poller_id.as_str();

    let store: Arc<dyn CursorStore> = match config.cursor.backend {
        CursorBackend::Postgres => Arc::new(PgCursorStore::new(pool.clone(), poller_id)),
        CursorBackend::Redis => Arc::new(
            RedisCursorStore::connect(&config.redis.url, &config.cursor.key_prefix, poller_id)
                .await?,
        ),
        CursorBackend::Memory => Arc::new(InMemoryCursorStore::new()),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_cursor_encode_decode() {
        let cursor = Cursor::new("Bx7Fk2", 12);
        let encoded = cursor.encode().unwrap();
        assert!(!encoded.contains('='));
        assert_eq!(Cursor::decode(&encoded).unwrap(), cursor);
    }

    #[test]
    fn test_cursor_accepts_string_sequence() {
        let cursor: Cursor =
            serde_json::from_str(r#"{"txDigest":"abc","eventSeq":"42"}"#).unwrap();
        assert_eq!(cursor.event_seq, 42);

        let cursor: Cursor = serde_json::from_str(r#"{"txDigest":"abc","eventSeq":7}"#).unwrap();
        assert_eq!(cursor.event_seq, 7);
    }

    #[test]
    fn test_corrupt_cursor_is_reported() {
        let err = Cursor::decode("!!not-base64!!").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CursorCorrupt);

        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        let err = Cursor::decode(&not_json).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CursorCorrupt);
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(Cursor::new("a", 1), Cursor::new("a", 1));
        assert_ne!(Cursor::new("a", 1), Cursor::new("a", 2));
    }
}
