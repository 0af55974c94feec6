//! Redis connection pool management.

use filecast_core::FilecastError;
use redis::aio::ConnectionManager;
use thiserror::Error;

/// Redis error types.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Result type for Redis operations.
pub type RedisResult<T> = Result<T, RedisError>;

/// Redis connection pool. ConnectionManager handles multiplexing and
/// reconnects internally. It is Clone, so callers clone it per operation.
pub type RedisPool = ConnectionManager;

/// Initialize a Redis connection pool from a URL.
///
/// Example URL: `redis://127.0.0.1:6379`
pub async fn init_pool(redis_url: &str) -> RedisResult<RedisPool> {
    let client = redis::Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;
    Ok(manager)
}

impl RedisError {
    pub(crate) fn into_queue_error(self, queue: &str) -> FilecastError {
        FilecastError::queue(format!("{} (queue '{}')", self, queue))
    }

    pub(crate) fn into_storage_error(self) -> FilecastError {
        FilecastError::storage(self.to_string())
    }
}
