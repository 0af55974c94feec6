//! Hands uploaded files to the analysis worker.

use std::sync::Arc;
use tracing::{error, info};

use crate::model::{ObjectLocation, TaskMessage};
use crate::queue::MessageQueue;

/// Places a [`TaskMessage`] on the work queue for every stored upload.
///
/// Submission is fire-and-forget: failures are logged and never reach the
/// upload response.
#[derive(Clone)]
pub struct TaskEmitter {
    queue: Arc<dyn MessageQueue>,
}

impl TaskEmitter {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue an analysis task. Returns whether the queue accepted it.
    pub async fn emit(&self, location: &ObjectLocation, user_id: &str) -> bool {
        let task = TaskMessage::new(location, user_id);
        let payload = match serde_json::to_string(&task) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, %location, user_id, "Failed to serialize task message");
                return false;
            }
        };

        match self.queue.enqueue(&payload).await {
            Ok(message_id) => {
                info!(%location, user_id, message_id = %message_id, "Analysis task enqueued");
                true
            }
            Err(e) => {
                error!(error = %e, %location, user_id, "Failed to enqueue analysis task");
                false
            }
        }
    }
}
