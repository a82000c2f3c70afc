//! Process-local cursor store.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Cursor, CursorRecord, CursorStore};
use crate::error::Result;

/// Keeps the cursor in memory. Lost on restart.
///
/// Every successful write is also appended to a history so callers can check
/// what sequence of positions was persisted.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    slot: RwLock<Option<CursorRecord>>,
    history: RwLock<Vec<Cursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a cursor already stored.
    pub fn with_cursor(cursor: &Cursor) -> Result<Self> {
        let store = Self::new();
        *store.slot.write() = Some(CursorRecord::new(cursor)?);
        Ok(store)
    }

    /// All cursors written through [`CursorStore::store_record`], oldest first.
    pub fn history(&self) -> Vec<Cursor> {
        self.history.read().clone()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load_record(&self) -> Result<Option<CursorRecord>> {
        Ok(self.slot.read().clone())
    }

    async fn store_record(&self, record: &CursorRecord) -> Result<()> {
        let cursor = record.decode()?;
        // history is appended while the slot lock is held
        let mut slot = self.slot.write();
        self.history.write().push(cursor);
        *slot = Some(record.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
