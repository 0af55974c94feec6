//! In-process queue and object store.
//!
//! Used by the test suites and by `filecast serve --backend memory` for
//! running without Redis. Both follow the same contracts as the Redis
//! backends, including visibility timeouts and dead-lettering.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{FilecastError, FilecastResult};
use crate::model::ObjectLocation;
use crate::queue::{MessageQueue, ReceivedMessage};
use crate::storage::ObjectStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Split an ack handle of the form `{id}:{receive_count}`.
fn handle_id(ack_handle: &str) -> &str {
    ack_handle
        .rsplit_once(':')
        .map(|(id, _)| id)
        .unwrap_or(ack_handle)
}

struct StoredMessage {
    payload: String,
    receive_count: u32,
    invisible_until: Option<Instant>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    messages: HashMap<String, StoredMessage>,
    dead: Vec<String>,
    fail_next: usize,
}

impl QueueState {
    /// Return in-flight messages whose visibility timeout has expired.
    fn reclaim(&mut self, now: Instant) {
        let mut expired: Vec<String> = self
            .messages
            .iter()
            .filter(|(_, m)| m.invisible_until.is_some_and(|t| t <= now))
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();
        for id in expired.into_iter().rev() {
            if let Some(m) = self.messages.get_mut(&id) {
                m.invisible_until = None;
            }
            self.pending.push_front(id);
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.messages.values().filter_map(|m| m.invisible_until).min()
    }
}

/// Queue with at-least-once delivery held entirely in memory.
pub struct MemoryQueue {
    name: String,
    visibility_timeout: Duration,
    max_receive_count: Option<u32>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            max_receive_count: None,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Move a message to the dead-letter list once it has been received
    /// more than `count` times.
    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = Some(count);
        self
    }

    /// Messages not yet acknowledged or dead-lettered, in flight included.
    pub fn len(&self) -> usize {
        lock(&self.state).messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages currently hidden by a visibility timeout.
    pub fn in_flight(&self) -> usize {
        lock(&self.state)
            .messages
            .values()
            .filter(|m| m.invisible_until.is_some())
            .count()
    }

    /// Payloads moved aside after exceeding the receive limit.
    pub fn dead_letters(&self) -> Vec<String> {
        lock(&self.state).dead.clone()
    }

    /// Make the next `n` queue calls fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        lock(&self.state).fail_next = n;
    }

    fn check_failure(&self, state: &mut QueueState, op: &str) -> FilecastResult<()> {
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(FilecastError::queue(format!(
                "{} on '{}' failed: simulated outage",
                op, self.name
            )));
        }
        Ok(())
    }

    fn take_batch(&self, max_count: usize) -> FilecastResult<Vec<ReceivedMessage>> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        self.check_failure(state, "receive")?;

        let now = Instant::now();
        state.reclaim(now);

        let mut batch = Vec::new();
        while batch.len() < max_count {
            let Some(id) = state.pending.pop_front() else {
                break;
            };
            let Some(message) = state.messages.get_mut(&id) else {
                continue;
            };
            message.receive_count += 1;

            if let Some(limit) = self.max_receive_count {
                if message.receive_count > limit {
                    if let Some(dead) = state.messages.remove(&id) {
                        tracing::warn!(queue = %self.name, id = %id, "Message exceeded receive limit, dead-lettered");
                        state.dead.push(dead.payload);
                    }
                    continue;
                }
            }

            message.invisible_until = Some(now + self.visibility_timeout);
            batch.push(ReceivedMessage {
                payload: message.payload.clone(),
                ack_handle: format!("{}:{}", id, message.receive_count),
                receive_count: message.receive_count,
            });
        }
        Ok(batch)
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn enqueue(&self, payload: &str) -> FilecastResult<String> {
        let id = Uuid::new_v4().to_string();
        {
            let mut state = lock(&self.state);
            self.check_failure(&mut state, "enqueue")?;
            state.messages.insert(
                id.clone(),
                StoredMessage {
                    payload: payload.to_string(),
                    receive_count: 0,
                    invisible_until: None,
                },
            );
            state.pending.push_back(id.clone());
        }
        self.notify.notify_one();
        Ok(id)
    }

    async fn receive(
        &self,
        max_count: usize,
        wait: Duration,
    ) -> FilecastResult<Vec<ReceivedMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let batch = self.take_batch(max_count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(batch);
            }
            let wake_at = lock(&self.state)
                .next_expiry()
                .map_or(deadline, |expiry| expiry.min(deadline));

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, ack_handle: &str) -> FilecastResult<()> {
        let id = handle_id(ack_handle);
        let mut state = lock(&self.state);
        self.check_failure(&mut state, "acknowledge")?;
        if state.messages.remove(id).is_some() {
            state.pending.retain(|pending| pending != id);
        }
        Ok(())
    }
}

/// Object store backed by an ordered map.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectLocation, Vec<u8>>>,
    fail_next: AtomicUsize,
    gets: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store calls fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of `get` calls served so far.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn check_failure(&self, op: &str) -> FilecastResult<()> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FilecastError::storage(format!("{} failed: simulated outage", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, location: &ObjectLocation) -> FilecastResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_failure("get")?;
        lock(&self.objects)
            .get(location)
            .cloned()
            .ok_or_else(|| FilecastError::ObjectNotFound {
                bucket: location.bucket.clone(),
                key: location.key.clone(),
            })
    }

    async fn put(&self, location: &ObjectLocation, bytes: Vec<u8>) -> FilecastResult<()> {
        self.check_failure("put")?;
        lock(&self.objects).insert(location.clone(), bytes);
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> FilecastResult<Vec<ObjectLocation>> {
        self.check_failure("list")?;
        let start = ObjectLocation::new(bucket, prefix);
        Ok(lock(&self.objects)
            .range(start..)
            .map(|(location, _)| location)
            .take_while(|location| location.bucket == bucket && location.key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_and_acknowledge() {
        let queue = MemoryQueue::new("q", Duration::from_secs(30));
        queue.enqueue("one").await.unwrap();
        queue.enqueue("two").await.unwrap();

        let batch = queue.receive(5, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, "one");
        assert_eq!(batch[1].payload, "two");
        assert_eq!(batch[0].receive_count, 1);
        assert_eq!(queue.in_flight(), 2);

        queue.acknowledge(&batch[0].ack_handle).await.unwrap();
        assert_eq!(queue.len(), 1);

        // Acknowledging twice is harmless.
        queue.acknowledge(&batch[0].ack_handle).await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_receive_respects_batch_size() {
        let queue = MemoryQueue::new("q", Duration::from_secs(30));
        for i in 0..4 {
            queue.enqueue(&format!("m{}", i)).await.unwrap();
        }
        let batch = queue.receive(3, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 3);
        let rest = queue.receive(3, Duration::ZERO).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload, "m3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_message_is_redelivered() {
        let queue = MemoryQueue::new("q", Duration::from_secs(30));
        queue.enqueue("job").await.unwrap();

        let first = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queue.receive(1, Duration::ZERO).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, "job");
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].ack_handle, first[0].ack_handle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MemoryQueue::new("q", Duration::from_secs(30)));
        let poller = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(5, Duration::from_secs(10)).await })
        };
        tokio::task::yield_now().await;
        queue.enqueue("late").await.unwrap();

        let batch = poller.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_times_out_empty() {
        let queue = MemoryQueue::new("q", Duration::from_secs(30));
        let started = Instant::now();
        let batch = queue.receive(5, Duration::from_secs(10)).await.unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_after_receive_limit() {
        let queue = MemoryQueue::new("q", Duration::from_secs(1)).with_max_receive_count(2);
        queue.enqueue("poison").await.unwrap();

        for _ in 0..2 {
            assert_eq!(queue.receive(1, Duration::ZERO).await.unwrap().len(), 1);
            tokio::time::advance(Duration::from_secs(2)).await;
        }
        assert!(queue.receive(1, Duration::ZERO).await.unwrap().is_empty());
        assert_eq!(queue.dead_letters(), vec!["poison".to_string()]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_simulated_queue_failure() {
        let queue = MemoryQueue::new("q", Duration::from_secs(30));
        queue.fail_next(1);
        let err = queue.receive(1, Duration::ZERO).await.unwrap_err();
        assert!(err.is_transient());
        assert!(queue.receive(1, Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_get_put_list() {
        let store = MemoryStore::new();
        let a = ObjectLocation::new("b", "users/1/a.txt");
        let b = ObjectLocation::new("b", "users/1/b.txt");
        let other_user = ObjectLocation::new("b", "users/12/c.txt");
        let other_bucket = ObjectLocation::new("c", "users/1/d.txt");
        for loc in [&b, &a, &other_user, &other_bucket] {
            store.put(loc, b"x".to_vec()).await.unwrap();
        }

        assert_eq!(store.get(&a).await.unwrap(), b"x".to_vec());
        assert_eq!(store.list("b", "users/1/").await.unwrap(), vec![a, b]);
        assert_eq!(store.list("b", "").await.unwrap().len(), 3);
        assert!(store.list("z", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_missing_object() {
        let store = MemoryStore::new();
        let err = store
            .get(&ObjectLocation::new("b", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, FilecastError::ObjectNotFound { .. }));
        assert!(!err.is_transient());
        assert_eq!(store.get_count(), 1);
    }
}
