//! Filecast Redis Backends
//!
//! Durable queue and object store implementations of the
//! `filecast-core` contracts, built on a shared Redis connection.

pub mod client;
pub mod queries;

pub use client::{RedisError, RedisPool, RedisResult, init_pool};
pub use queries::objects::RedisStore;
pub use queries::queue::RedisQueue;
