//! Object store contract.

use async_trait::async_trait;

use crate::error::FilecastResult;
use crate::model::ObjectLocation;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object. A missing object is
    /// [`FilecastError::ObjectNotFound`](crate::FilecastError::ObjectNotFound).
    async fn get(&self, location: &ObjectLocation) -> FilecastResult<Vec<u8>>;

    /// Create or replace an object.
    async fn put(&self, location: &ObjectLocation, bytes: Vec<u8>) -> FilecastResult<()>;

    /// Objects in `bucket` whose key starts with `prefix`, ordered by key.
    async fn list(&self, bucket: &str, prefix: &str) -> FilecastResult<Vec<ObjectLocation>>;
}
