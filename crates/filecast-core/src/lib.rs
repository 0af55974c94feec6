//! Filecast Core Library
//!
//! Job-completion notification pipeline: analysis tasks go out on a work
//! queue, completion messages come back on a response queue, and each
//! completed artifact is pushed to every live viewer.

pub mod broadcast;
pub mod config;
pub mod consumer;
pub mod emitter;
pub mod error;
pub mod fetcher;
pub mod memory;
pub mod model;
pub mod queue;
pub mod storage;

pub use broadcast::{Broadcaster, Subscription, SubscriptionId};
pub use config::PipelineConfig;
pub use consumer::{MessageOutcome, PollStats, QueueConsumer};
pub use emitter::TaskEmitter;
pub use error::{FilecastError, FilecastResult};
pub use fetcher::ResultFetcher;
pub use model::{CompletionMessage, NotificationEvent, ObjectLocation, TaskMessage};
pub use queue::{MessageQueue, ReceivedMessage};
pub use storage::ObjectStore;
