//! Messages that flow through the notification pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FilecastError, FilecastResult};

/// Suffix the analysis worker appends when it stores a summary.
pub const OVERVIEW_SUFFIX: &str = "_overview.txt";

/// Coordinates of an object in the object store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Work item handed to the analysis worker after an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub bucket: String,
    pub key: String,
    pub user_id: String,
}

impl TaskMessage {
    pub fn new(location: &ObjectLocation, user_id: &str) -> Self {
        Self {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            user_id: user_id.to_string(),
        }
    }
}

/// Result announcement sent back by the analysis worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub bucket: String,
    pub key: String,
    pub status: String,
    pub user_id: String,
}

impl CompletionMessage {
    /// Where the result artifact lives.
    pub fn location(&self) -> ObjectLocation {
        ObjectLocation::new(&self.bucket, &self.key)
    }

    pub fn decode(payload: &str) -> FilecastResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Payload pushed to every live viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub user_id: String,
    pub content: String,
}

/// Prefix under which a user's uploads are stored.
pub fn user_prefix(user_id: &str) -> String {
    format!("users/{}/", user_id)
}

/// Object key for an uploaded file. Directory components in the
/// client-supplied name are discarded.
pub fn upload_key(user_id: &str, file_name: &str) -> FilecastResult<String> {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(FilecastError::validation(format!(
            "invalid file name '{}'",
            file_name
        )));
    }
    if user_id.is_empty() {
        return Err(FilecastError::validation("user id must not be empty"));
    }

    Ok(format!("{}{}", user_prefix(user_id), name))
}

/// Key of the summary the analysis worker writes for `key`.
///
/// `users/42/report.txt` becomes `users/42/report_overview.txt`. The
/// extension starts at the first `.` of the file name.
pub fn overview_key(key: &str) -> String {
    let name_start = key.rfind('/').map(|i| i + 1).unwrap_or(0);
    let stem_end = key[name_start..]
        .find('.')
        .map(|i| name_start + i)
        .unwrap_or(key.len());
    format!("{}{}", &key[..stem_end], OVERVIEW_SUFFIX)
}
