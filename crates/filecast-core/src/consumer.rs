//! Response queue consumer.
//!
//! One long-lived task per process drains completion messages, fetches the
//! artifact each one points at, publishes it to live viewers and only then
//! acknowledges the message. Anything that fails before the publish leaves
//! the message un-acknowledged so the queue redelivers it after its
//! visibility timeout.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::PipelineConfig;
use crate::error::FilecastResult;
use crate::fetcher::ResultFetcher;
use crate::model::{CompletionMessage, NotificationEvent};
use crate::queue::{MessageQueue, ReceivedMessage};

/// What happened to one received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Published to `recipients` viewers. Acknowledgement was attempted.
    Delivered { recipients: usize, acknowledged: bool },
    /// Payload could not be decoded; left for the queue to redeliver or expire.
    Malformed,
    /// Artifact fetch failed; left for the queue to redeliver.
    Failed,
}

/// Counters for one receive batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub received: usize,
    pub delivered: usize,
    pub malformed: usize,
    pub failed: usize,
}

pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    fetcher: ResultFetcher,
    broadcaster: Broadcaster,
    config: PipelineConfig,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        fetcher: ResultFetcher,
        broadcaster: Broadcaster,
        config: PipelineConfig,
    ) -> Self {
        Self {
            queue,
            fetcher,
            broadcaster,
            config,
        }
    }

    /// Start the consumer loop on the runtime. Call once per process.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll forever. Receive errors are logged and retried after
    /// `receive_backoff`; nothing terminates the loop.
    pub async fn run(self) {
        info!(
            batch_size = self.config.receive_batch_size,
            wait_secs = self.config.receive_wait.as_secs(),
            "Response queue consumer started"
        );
        loop {
            if let Err(e) = self.poll_once().await {
                error!(
                    error = %e,
                    backoff_secs = self.config.receive_backoff.as_secs(),
                    "Error receiving messages"
                );
                tokio::time::sleep(self.config.receive_backoff).await;
            }
        }
    }

    /// Receive one batch and process every message in it.
    pub async fn poll_once(&self) -> FilecastResult<PollStats> {
        let messages = self
            .queue
            .receive(self.config.receive_batch_size, self.config.receive_wait)
            .await?;

        let mut stats = PollStats {
            received: messages.len(),
            ..Default::default()
        };
        for message in &messages {
            match self.process(message).await {
                MessageOutcome::Delivered { .. } => stats.delivered += 1,
                MessageOutcome::Malformed => stats.malformed += 1,
                MessageOutcome::Failed => stats.failed += 1,
            }
        }

        if stats.received > 0 {
            debug!(?stats, "Processed response batch");
        }
        Ok(stats)
    }

    /// Decode, fetch, publish, then acknowledge.
    pub async fn process(&self, message: &ReceivedMessage) -> MessageOutcome {
        let completion = match CompletionMessage::decode(&message.payload) {
            Ok(completion) => completion,
            Err(e) => {
                warn!(
                    error = %e,
                    receive_count = message.receive_count,
                    "Failed to parse completion message, skipping"
                );
                return MessageOutcome::Malformed;
            }
        };

        let location = completion.location();
        info!(
            user_id = %completion.user_id,
            %location,
            status = %completion.status,
            "Summary ready"
        );

        let content = match self.fetcher.fetch(&location).await {
            Ok(content) => content,
            Err(e) if e.is_transient() => {
                warn!(
                    error = %e,
                    %location,
                    receive_count = message.receive_count,
                    "Store unavailable, leaving message for redelivery"
                );
                return MessageOutcome::Failed;
            }
            Err(e) => {
                error!(
                    error = %e,
                    %location,
                    receive_count = message.receive_count,
                    "Failed to fetch artifact, leaving message for redelivery"
                );
                return MessageOutcome::Failed;
            }
        };

        let recipients = self.broadcaster.publish(&NotificationEvent {
            user_id: completion.user_id,
            content,
        });

        let acknowledged = match self.queue.acknowledge(&message.ack_handle).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, %location, "Failed to delete message, it will be redelivered");
                false
            }
        };

        MessageOutcome::Delivered {
            recipients,
            acknowledged,
        }
    }
}
