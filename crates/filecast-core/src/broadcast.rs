//! In-process fan-out of notifications to live viewers.
//!
//! Every viewer owns a [`Subscription`] with a single-slot mailbox. Publishing
//! never waits on a viewer: if a mailbox still holds an undrained event the
//! new one is dropped for that viewer only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

use crate::model::NotificationEvent;

/// Capacity of each viewer's mailbox.
pub const MAILBOX_CAPACITY: usize = 1;

/// Identifier of a registered subscription.
pub type SubscriptionId = u64;

#[derive(Default)]
struct Registry {
    next_id: SubscriptionId,
    mailboxes: HashMap<SubscriptionId, mpsc::Sender<String>>,
}

/// Publish/subscribe hub shared by the queue consumer and the SSE endpoint.
///
/// Cloning is cheap; all clones share one registry.
#[derive(Clone, Default)]
pub struct Broadcaster {
    registry: Arc<Mutex<Registry>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new viewer. Never blocks.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let id = {
            let mut registry = self.registry();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.mailboxes.insert(id, tx);
            id
        };
        debug!(subscription = id, "Viewer subscribed");
        Subscription {
            id,
            mailbox: rx,
            broadcaster: self.clone(),
        }
    }

    /// Remove a subscription and close its mailbox.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry().mailboxes.remove(&id).is_some();
        if removed {
            debug!(subscription = id, "Viewer unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every mailbox that has room.
    ///
    /// Returns the number of mailboxes the event was deposited into.
    pub fn publish(&self, event: &NotificationEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, user_id = %event.user_id, "Failed to serialize notification");
                return 0;
            }
        };

        let registry = self.registry();
        let mut delivered = 0;
        let mut dropped = 0;
        for (id, mailbox) in &registry.mailboxes {
            match mailbox.try_send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    debug!(subscription = id, "Mailbox full, dropping notification");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscription = id, "Mailbox closed, skipping");
                }
            }
        }
        let subscribers = registry.mailboxes.len();
        drop(registry);

        debug!(
            user_id = %event.user_id,
            subscribers,
            delivered,
            dropped,
            "Notification published"
        );
        delivered
    }

    /// Number of currently registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry().mailboxes.len()
    }
}

/// A viewer's handle on the broadcaster.
///
/// Dropping it unsubscribes, so a viewer that disconnects mid-wait is
/// always removed from the registry.
pub struct Subscription {
    id: SubscriptionId,
    mailbox: mpsc::Receiver<String>,
    broadcaster: Broadcaster,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next serialized event. Returns `None` once the
    /// subscription has been removed and the mailbox is drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.mailbox.recv().await
    }

    /// Take the pending event, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        match self.mailbox.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
