//! Retrieves analysis artifacts from the object store.

use std::sync::Arc;
use tracing::debug;

use crate::error::FilecastResult;
use crate::model::ObjectLocation;
use crate::storage::ObjectStore;

/// Reads the artifact a completion message points at.
///
/// No caching: every call is exactly one store read, including for
/// redelivered messages.
#[derive(Clone)]
pub struct ResultFetcher {
    store: Arc<dyn ObjectStore>,
}

impl ResultFetcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Fetch the artifact and decode it as text. Invalid UTF-8 sequences
    /// are replaced rather than rejected.
    pub async fn fetch(&self, location: &ObjectLocation) -> FilecastResult<String> {
        let bytes = self.store.get(location).await?;
        debug!(%location, bytes = bytes.len(), "Fetched artifact");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
