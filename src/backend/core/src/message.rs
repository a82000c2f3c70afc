//! Chat messages and the raw ledger events they are decoded from.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IngestError, Result};

/// Logical identity of an event and of the message stored for it.
///
/// Two events with the same key are the same event, however many times the
/// ledger hands them out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Digest of the transaction that emitted the event
    pub source_digest: String,
    /// Ledger-assigned sequence of the event within that transaction
    pub sequence: u64,
}

impl MessageKey {
    pub fn new(source_digest: impl Into<String>, sequence: u64) -> Self {
        Self {
            source_digest: source_digest.into(),
            sequence,
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_digest, self.sequence)
    }
}

/// A single raw item returned by an event source. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub key: MessageKey,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub text: String,
}

impl LedgerEvent {
    /// Decode this event into the message that gets persisted.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            source_digest: self.key.source_digest.clone(),
            sequence: self.key.sequence,
            created_at: self.timestamp,
            sender_address: self.sender.clone(),
            text: self.text.clone(),
        }
    }
}

/// The durable chat record. Unique on `(source_digest, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub source_digest: String,
    pub sequence: u64,
    #[serde(with = "rfc3339")]
    pub created_at: DateTime<Utc>,
    pub sender_address: String,
    #[serde(rename = "messageText")]
    pub text: String,
}

impl ChatMessage {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.source_digest.clone(), self.sequence)
    }

    /// Reject records no storage layer should accept.
    ///
    /// Failures here are non-retryable: the same input fails the same way.
    pub fn validate(&self) -> Result<()> {
        if self.source_digest.trim().is_empty() {
            return Err(IngestError::malformed_message("empty source digest"));
        }
        if self.sender_address.trim().is_empty() {
            return Err(IngestError::malformed_message(format!(
                "empty sender address for {}",
                self.key()
            )));
        }
        if self.sequence > i64::MAX as u64 {
            return Err(IngestError::malformed_message(format!(
                "sequence {} out of range",
                self.sequence
            )));
        }
        Ok(())
    }
}

/// ISO-8601 (RFC 3339, millisecond precision) timestamps on the wire.
mod rfc3339 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::TimeZone;

    fn sample() -> ChatMessage {
        ChatMessage {
            source_digest: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
            sequence: 3,
            created_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            sender_address: "0xabc".to_string(),
            text: "gm".to_string(),
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["sourceDigest"], "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin");
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["createdAt"], "2023-11-14T22:13:20.123Z");
        assert_eq!(json["senderAddress"], "0xabc");
        assert_eq!(json["messageText"], "gm");
    }

    #[test]
    fn test_event_to_message_keeps_identity() {
        let event = LedgerEvent {
            key: MessageKey::new("digest", 7),
            timestamp: Utc::now(),
            sender: "0x1".to_string(),
            text: "hello".to_string(),
        };
        let msg = event.to_message();
        assert_eq!(msg.key(), event.key);
        assert_eq!(msg.text, "hello");
    }

    #[test]
    fn test_validate_rejects_empty_sender() {
        let mut msg = sample();
        msg.sender_address = "  ".to_string();
        let err = msg.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedMessage);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(MessageKey::new("abc", 2).to_string(), "abc:2");
    }
}
