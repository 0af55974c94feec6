//! Durable queue contract.
//!
//! Both the work queue and the response queue are reached through this
//! trait. Delivery is at-least-once: a message that is received but never
//! acknowledged becomes receivable again once the provider's visibility
//! timeout expires.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::FilecastResult;

/// A message handed out by [`MessageQueue::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub payload: String,
    /// Opaque token passed back to [`MessageQueue::acknowledge`].
    pub ack_handle: String,
    /// How many times the provider has handed this message out, this one included.
    pub receive_count: u32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Append a payload. Returns the provider's message id.
    async fn enqueue(&self, payload: &str) -> FilecastResult<String>;

    /// Long-poll for up to `max_count` messages, waiting at most `wait`
    /// when the queue is empty. An empty batch is not an error.
    async fn receive(&self, max_count: usize, wait: Duration)
        -> FilecastResult<Vec<ReceivedMessage>>;

    /// Delete a received message so it is never redelivered.
    async fn acknowledge(&self, ack_handle: &str) -> FilecastResult<()>;
}
