//! PostgreSQL LISTEN/NOTIFY change stream feeding a [`RealtimeFanout`].
//!
//! The `chat_messages` insert trigger publishes each new row as JSON on a
//! notification channel. Rows arrive here whoever inserted them (poller,
//! generator or another process).

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::RealtimeFanout;
use crate::error::{ErrorCode, IngestError, Result};
use crate::message::ChatMessage;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Change-stream listener bound to one notification channel.
pub struct PgChangeFeed {
    listener: PgListener,
    channel: String,
    fanout: Arc<RealtimeFanout>,
}

impl PgChangeFeed {
    /// Open a dedicated listening connection.
    ///
    /// Fails with [`ErrorCode::ChangeFeedUnavailable`]; callers fall back to
    /// polling the sink's read side.
    pub async fn connect(
        pool: &PgPool,
        channel: impl Into<String>,
        fanout: Arc<RealtimeFanout>,
    ) -> Result<Self> {
        let channel = channel.into();

        let mut listener = PgListener::connect_with(pool)
            .await
            .map_err(|e| IngestError::from_database(e, ErrorCode::ChangeFeedUnavailable))?;
        listener
            .listen(&channel)
            .await
            .map_err(|e| IngestError::from_database(e, ErrorCode::ChangeFeedUnavailable))?;

        info!(channel = %channel, "Listening for new chat messages");

        Ok(Self {
            listener,
            channel,
            fanout,
        })
    }

    /// Forward notifications to the fanout until cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(channel = %self.channel, "Change feed stopping");
                    break;
                }
                received = self.listener.try_recv() => match received {
                    Ok(Some(notification)) => match decode_payload(notification.payload()) {
                        Ok(message) => {
                            let report = self.fanout.notify(&message);
                            debug!(
                                key = %message.key(),
                                delivered = report.delivered,
                                "Change notification delivered"
                            );
                        }
                        Err(e) => {
                            warn!(channel = %self.channel, error = %e, "Dropping undecodable change notification");
                        }
                    },
                    // Connection lost; the next try_recv reconnects and re-listens
                    Ok(None) => {
                        warn!(channel = %self.channel, "Change feed connection lost, reconnecting");
                    }
                    Err(e) => {
                        error!(channel = %self.channel, error = %e, "Change feed receive failed");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Decode a trigger payload into a message.
pub fn decode_payload(payload: &str) -> Result<ChatMessage> {
    let message: ChatMessage = serde_json::from_str(payload)?;
    Ok(message)
}
