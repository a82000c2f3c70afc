//! Ledger full-node client speaking the `queryEvents` JSON-RPC shape.
//!
//! Request: `[{"MoveEventType": <type>}, <cursor|null>, <limit>, false]`.
//! Response page: `{ data: [..], nextCursor: {txDigest, eventSeq} | null, hasNextPage }`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::{EventBatch, EventSource};
use crate::config::SourceConfig;
use crate::cursor::Cursor;
use crate::error::{IngestError, Result};
use crate::message::{LedgerEvent, MessageKey};

/// Event source backed by a ledger node's JSON-RPC API.
pub struct JsonRpcEventSource {
    client: Client,
    config: SourceConfig,
    request_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<EventPage>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPage {
    data: Vec<RawEvent>,
    next_cursor: Option<Cursor>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    id: Cursor,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    parsed_json: Value,
    #[serde(default)]
    timestamp_ms: Option<Value>,
}

impl JsonRpcEventSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| IngestError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            request_id: AtomicU64::new(1),
        })
    }

    fn request_body(&self, cursor: Option<&Cursor>) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": self.config.method,
            "params": [
                { "MoveEventType": self.config.event_type },
                cursor,
                self.config.page_limit,
                false
            ]
        })
    }

    /// Turn one raw event into a ledger event, or explain why it can't be.
    fn decode_event(&self, raw: &RawEvent) -> std::result::Result<LedgerEvent, String> {
        let sender = raw
            .parsed_json
            .get(&self.config.sender_field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| raw.sender.clone())
            .ok_or_else(|| format!("no `{}` field and no transaction sender", self.config.sender_field))?;

        let text = raw
            .parsed_json
            .get(&self.config.text_field)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("no `{}` string field", self.config.text_field))?
            .to_string();

        let timestamp = match raw.timestamp_ms.as_ref().and_then(parse_millis) {
            Some(ts) => ts,
            None => Utc::now(),
        };

        Ok(LedgerEvent {
            key: MessageKey::new(raw.id.tx_digest.clone(), raw.id.event_seq),
            timestamp,
            sender,
            text,
        })
    }
}

fn parse_millis(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(millis).single()
}

#[async_trait]
impl EventSource for JsonRpcEventSource {
    async fn fetch(&self, cursor: Option<&Cursor>) -> Result<EventBatch> {
        let body = self.request_body(cursor);

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let rpc: RpcResponse = response.json().await?;

        if let Some(err) = rpc.error {
            return Err(IngestError::malformed_response(format!(
                "rpc error {}: {}",
                err.code, err.message
            )));
        }
        let page = rpc
            .result
            .ok_or_else(|| IngestError::malformed_response("response has neither result nor error"))?;

        let mut events = Vec::with_capacity(page.data.len());
        for raw in &page.data {
            match self.decode_event(raw) {
                Ok(event) => events.push(event),
                Err(reason) => {
                    // Undecodable events never become decodable; skip them
                    // rather than stall the cursor behind them.
                    warn!(event = %raw.id, reason = %reason, "Skipping undecodable ledger event");
                    metrics::counter!("chainchat_events_undecodable_total").increment(1);
                }
            }
        }

        debug!(
            fetched = page.data.len(),
            decoded = events.len(),
            has_next_page = page.has_next_page,
            "Fetched event page"
        );

        Ok(EventBatch {
            events,
            next_cursor: page.next_cursor,
            has_next_page: page.has_next_page,
        })
    }

    fn name(&self) -> &'static str {
        "json-rpc"
    }
}
