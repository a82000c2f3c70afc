//! Event sources: where ledger chat events come from.
//!
//! An [`EventSource`] is handed the current cursor and answers with the next
//! page of events plus the cursor to resume from. Sources are passed to the
//! poller explicitly, so several pollers (or test doubles) can coexist.

mod memory;
mod rpc;

pub use memory::InMemoryEventSource;
pub use rpc::JsonRpcEventSource;

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::Result;
use crate::message::LedgerEvent;

/// One page of events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    /// Events in source order
    pub events: Vec<LedgerEvent>,
    /// Where to resume. `None` when the source has nothing to say (typically
    /// an empty page); never means "go back to the start".
    pub next_cursor: Option<Cursor>,
    /// More events are available right now
    pub has_next_page: bool,
}

impl EventBatch {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Contract for anything that can page through ledger events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch the events after `cursor` (`None` = from the beginning).
    async fn fetch(&self, cursor: Option<&Cursor>) -> Result<EventBatch>;

    /// Get the source name.
    fn name(&self) -> &'static str;
}
