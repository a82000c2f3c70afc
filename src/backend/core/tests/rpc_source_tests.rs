//! Poller against a mocked ledger JSON-RPC endpoint.
//!
//! Tests cover:
//! - Paging with `nextCursor` / `hasNextPage`
//! - Empty pages with a null cursor
//! - Source outages ending a tick without moving the cursor
//! - Outages on a later page keeping the pages already stored

use chainchat_core::config::{PollerConfig, SourceConfig};
use chainchat_core::cursor::{Cursor, CursorStore, InMemoryCursorStore};
use chainchat_core::error::ErrorCode;
use chainchat_core::poller::EventPoller;
use chainchat_core::sink::InMemoryMessageSink;
use chainchat_core::source::JsonRpcEventSource;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EVENT_TYPE: &str = "0x5eed::chat::ChatEvent";

fn source_config(url: &str) -> SourceConfig {
    SourceConfig {
        rpc_url: url.to_string(),
        event_type: EVENT_TYPE.to_string(),
        method: "suix_queryEvents".to_string(),
        page_limit: 2,
        request_timeout_ms: 2_000,
        sender_field: "sender".to_string(),
        text_field: "text".to_string(),
    }
}

fn raw_event(digest: &str, seq: u64, text: &str) -> Value {
    json!({
        "id": { "txDigest": digest, "eventSeq": seq.to_string() },
        "parsedJson": { "sender": "0xc0de", "text": text },
        "timestampMs": "1710000000000"
    })
}

fn page(data: Vec<Value>, next: Option<(&str, u64)>, has_next: bool) -> Value {
    let next_cursor = match next {
        Some((digest, seq)) => json!({ "txDigest": digest, "eventSeq": seq.to_string() }),
        None => Value::Null,
    };
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": { "data": data, "nextCursor": next_cursor, "hasNextPage": has_next }
    })
}

fn params(cursor: Value) -> Value {
    json!({ "params": [{ "MoveEventType": EVENT_TYPE }, cursor, 2, false] })
}

// ============================================================================
// Paging
// ============================================================================

#[tokio::test]
async fn test_poller_pages_through_rpc_source() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(params(Value::Null)))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![raw_event("A", 0, "gm"), raw_event("A", 1, "gm again")],
            Some(("A", 1)),
            true,
        )))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(params(json!({ "txDigest": "A", "eventSeq": "1" }))))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![raw_event("B", 0, "wagmi")],
            Some(("B", 0)),
            false,
        )))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(params(json!({ "txDigest": "B", "eventSeq": "0" }))))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![], None, false)))
        .mount(&server)
        .await;

    let source = Arc::new(JsonRpcEventSource::new(source_config(&server.uri())).unwrap());
    let sink = Arc::new(InMemoryMessageSink::new());
    let cursors = Arc::new(InMemoryCursorStore::new());
    let mut poller = EventPoller::new(source, sink.clone(), cursors.clone(), PollerConfig::new(1_000));
    poller.load_cursor().await.unwrap();

    let report = poller.tick().await.unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.inserted, 3);
    assert_eq!(cursors.get().await.unwrap(), Some(Cursor::new("B", 0)));

    // Caught up: empty page, null cursor, position kept
    let report = poller.tick().await.unwrap();
    assert_eq!(report.inserted, 0);
    assert!(!report.cursor_advanced);
    assert_eq!(poller.current_cursor(), Some(&Cursor::new("B", 0)));

    let texts: Vec<String> = sink.messages().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["gm", "gm again", "wagmi"]);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_outage_keeps_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let source = Arc::new(JsonRpcEventSource::new(source_config(&server.uri())).unwrap());
    let cursors = Arc::new(InMemoryCursorStore::with_cursor(&Cursor::new("Z", 9)).unwrap());
    let mut poller = EventPoller::new(
        source,
        Arc::new(InMemoryMessageSink::new()),
        cursors.clone(),
        PollerConfig::new(1_000),
    );
    poller.load_cursor().await.unwrap();

    let err = poller.tick().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SourceUnavailable);
    assert_eq!(poller.current_cursor(), Some(&Cursor::new("Z", 9)));
    assert!(cursors.history().is_empty());
}

#[tokio::test]
async fn test_outage_on_later_page_keeps_earlier_pages() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(params(Value::Null)))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![raw_event("A", 0, "gm"), raw_event("A", 1, "gm again")],
            Some(("A", 1)),
            true,
        )))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(params(json!({ "txDigest": "A", "eventSeq": "1" }))))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = Arc::new(JsonRpcEventSource::new(source_config(&server.uri())).unwrap());
    let sink = Arc::new(InMemoryMessageSink::new());
    let cursors = Arc::new(InMemoryCursorStore::new());
    let mut poller = EventPoller::new(source, sink.clone(), cursors.clone(), PollerConfig::new(1_000));
    poller.load_cursor().await.unwrap();

    let report = poller.tick().await.unwrap();
    assert!(report.fetch_failed);
    assert_eq!(report.inserted, 2);
    assert_eq!(cursors.history(), vec![Cursor::new("A", 1)]);
    assert_eq!(poller.stats().inserted(), sink.len() as u64);
}
