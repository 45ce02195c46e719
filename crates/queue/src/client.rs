//! Queue client trait and types.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A raw message received from a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body (JSON string).
    pub body: String,
    /// Provider-specific handle for ack (e.g., SQS receipt handle).
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been received (for retry tracking).
    pub attempt_count: u32,
}

/// Trait for queue backends.
///
/// Implementations handle the specifics of polling, acknowledging, and
/// sending messages for a particular queue provider. The dispatch loop
/// relies on `send` returning the provider message id: a delayed self-send
/// is the only timer the transport offers, and the returned id is how a
/// tick is later recognized as current or stale.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Poll up to `max_messages` from the queue.
    ///
    /// May block for up to the provider's long-poll timeout (e.g., 20s for
    /// SQS). Returns an empty vec if no messages are available.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge successful processing — removes the message from the queue.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Send a message, optionally delayed, returning the provider message id.
    async fn send(&self, body: &str, delay: Option<Duration>) -> Result<String, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_message_serde_roundtrip() {
        let msg = QueueMessage {
            id: "msg-123".to_string(),
            body: r#"{"eventType":"dispatch-tick"}"#.to_string(),
            receipt_handle: "handle-abc".to_string(),
            timestamp: Utc::now(),
            attempt_count: 1,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let deserialized: QueueMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.id, deserialized.id);
        assert_eq!(msg.body, deserialized.body);
        assert_eq!(msg.receipt_handle, deserialized.receipt_handle);
        assert_eq!(msg.attempt_count, deserialized.attempt_count);
    }
}
