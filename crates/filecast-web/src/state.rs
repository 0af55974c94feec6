//! Application state.

use filecast_core::{Broadcaster, MessageQueue, ObjectStore, ResultFetcher, TaskEmitter};
use std::sync::Arc;
use tokio::sync::watch;

/// Default cap on an upload request body.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Server-wide stop signal observed by long-lived event streams.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once [`Shutdown::trigger`] has been called.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Broadcaster,
    pub store: Arc<dyn ObjectStore>,
    pub fetcher: ResultFetcher,
    pub emitter: TaskEmitter,
    pub bucket: String,
    pub max_upload_bytes: usize,
    pub shutdown: Shutdown,
}

impl AppState {
    pub fn new(
        broadcaster: Broadcaster,
        store: Arc<dyn ObjectStore>,
        work_queue: Arc<dyn MessageQueue>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            broadcaster,
            fetcher: ResultFetcher::new(store.clone()),
            store,
            emitter: TaskEmitter::new(work_queue),
            bucket: bucket.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            shutdown: Shutdown::new(),
        }
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }
}
