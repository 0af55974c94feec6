//! Backend selection for queues and object storage.

use anyhow::{Context, Result};
use clap::ValueEnum;
use filecast_core::memory::{MemoryQueue, MemoryStore};
use filecast_core::{MessageQueue, ObjectStore};
use filecast_redis::{RedisQueue, RedisStore};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Redis lists and hashes; survives restarts
    Redis,
    /// In-process only; for local runs without Redis. No worker can reach
    /// the task queue, so every upload's task message stays in memory
    Memory,
}

/// Queue settings shared by both queues.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub visibility_timeout: Duration,
    pub max_receive_count: Option<u32>,
}

pub struct Backends {
    pub store: Arc<dyn ObjectStore>,
    pub work_queue: Arc<dyn MessageQueue>,
    pub response_queue: Arc<dyn MessageQueue>,
}

pub async fn connect(
    kind: BackendKind,
    redis_url: &str,
    work_queue: &str,
    response_queue: &str,
    settings: &QueueSettings,
) -> Result<Backends> {
    match kind {
        BackendKind::Redis => {
            let pool = filecast_redis::init_pool(redis_url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;
            // BRPOP holds its connection for the whole long poll, so the
            // response queue must not share a multiplexed connection.
            let consumer_pool = filecast_redis::init_pool(redis_url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;
            tracing::info!(redis_url, "Connected to Redis");

            let queue = |pool: &filecast_redis::RedisPool, name: &str| -> Arc<dyn MessageQueue> {
                Arc::new(
                    RedisQueue::new(pool.clone(), name, settings.visibility_timeout)
                        .with_max_receive_count(settings.max_receive_count),
                )
            };
            Ok(Backends {
                store: Arc::new(RedisStore::new(pool.clone())),
                work_queue: queue(&pool, work_queue),
                response_queue: queue(&consumer_pool, response_queue),
            })
        }
        BackendKind::Memory => {
            tracing::warn!(
                work_queue,
                "Using in-memory backend; nothing survives a restart and the task queue is never drained"
            );
            let queue = |name: &str| -> Arc<dyn MessageQueue> {
                let queue = MemoryQueue::new(name, settings.visibility_timeout);
                match settings.max_receive_count {
                    Some(count) => Arc::new(queue.with_max_receive_count(count)),
                    None => Arc::new(queue),
                }
            };
            Ok(Backends {
                store: Arc::new(MemoryStore::new()),
                work_queue: queue(work_queue),
                response_queue: queue(response_queue),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_help_warns_about_task_queue() {
        let value = BackendKind::Memory.to_possible_value().unwrap();
        let help = value.get_help().unwrap().to_string();
        assert!(help.contains("task message stays in memory"));
    }

    #[tokio::test]
    async fn test_memory_backends_need_no_redis() {
        let settings = QueueSettings {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: Some(3),
        };
        let backends = connect(
            BackendKind::Memory,
            "redis://unreachable:1",
            "task-queue",
            "response-queue",
            &settings,
        )
        .await
        .unwrap();

        backends.work_queue.enqueue("task").await.unwrap();
        let batch = backends
            .response_queue
            .receive(1, Duration::ZERO)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }
}
