//! Redis-backed object store.
//!
//! Object bytes live at `filecast:object:{bucket}:{key}`. Each bucket keeps a
//! lexically ordered index (`filecast:bucket:{bucket}:keys`, all scores 0) so
//! prefix listing is a single `ZRANGEBYLEX`.

use async_trait::async_trait;
use filecast_core::{FilecastError, FilecastResult, ObjectLocation, ObjectStore};
use redis::AsyncCommands;
use tracing::debug;

use crate::client::{RedisPool, RedisResult};

fn object_key(location: &ObjectLocation) -> String {
    format!("filecast:object:{}:{}", location.bucket, location.key)
}

fn index_key(bucket: &str) -> String {
    format!("filecast:bucket:{}:keys", bucket)
}

/// Lower bound of a `ZRANGEBYLEX` prefix scan.
fn lex_start(prefix: &str) -> String {
    if prefix.is_empty() {
        "-".to_string()
    } else {
        format!("[{}", prefix)
    }
}

#[derive(Clone)]
pub struct RedisStore {
    pool: RedisPool,
}

impl RedisStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    async fn get_inner(&self, location: &ObjectLocation) -> RedisResult<Option<Vec<u8>>> {
        let mut conn = self.pool.clone();
        let bytes: Option<Vec<u8>> = conn.get(object_key(location)).await?;
        Ok(bytes)
    }

    async fn put_inner(&self, location: &ObjectLocation, bytes: Vec<u8>) -> RedisResult<()> {
        let mut conn = self.pool.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(object_key(location), bytes)
            .ignore()
            .zadd(index_key(&location.bucket), &location.key, 0)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(%location, "Stored object");
        Ok(())
    }

    async fn list_inner(&self, bucket: &str, prefix: &str) -> RedisResult<Vec<String>> {
        let mut conn = self.pool.clone();
        let keys: Vec<String> = redis::cmd("ZRANGEBYLEX")
            .arg(index_key(bucket))
            .arg(lex_start(prefix))
            .arg("+")
            .query_async(&mut conn)
            .await?;
        Ok(keys
            .into_iter()
            .take_while(|key| key.starts_with(prefix))
            .collect())
    }
}

#[async_trait]
impl ObjectStore for RedisStore {
    async fn get(&self, location: &ObjectLocation) -> FilecastResult<Vec<u8>> {
        self.get_inner(location)
            .await
            .map_err(|e| e.into_storage_error())?
            .ok_or_else(|| FilecastError::ObjectNotFound {
                bucket: location.bucket.clone(),
                key: location.key.clone(),
            })
    }

    async fn put(&self, location: &ObjectLocation, bytes: Vec<u8>) -> FilecastResult<()> {
        self.put_inner(location, bytes)
            .await
            .map_err(|e| e.into_storage_error())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> FilecastResult<Vec<ObjectLocation>> {
        let keys = self
            .list_inner(bucket, prefix)
            .await
            .map_err(|e| e.into_storage_error())?;
        Ok(keys
            .into_iter()
            .map(|key| ObjectLocation::new(bucket, key))
            .collect())
    }
}
