//! Queue consumer tuning.

use std::time::Duration;

use crate::error::{FilecastError, FilecastResult};

/// Largest batch a single receive may request.
pub const MAX_RECEIVE_BATCH: usize = 10;

/// Longest long-poll a single receive may request. The wait must be non-zero.
pub const MAX_RECEIVE_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Messages requested per receive.
    pub receive_batch_size: usize,
    /// Long-poll wait when the response queue is empty.
    pub receive_wait: Duration,
    /// Pause after a failed receive before polling again.
    pub receive_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receive_batch_size: 5,
            receive_wait: Duration::from_secs(10),
            receive_backoff: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> FilecastResult<()> {
        if self.receive_batch_size == 0 || self.receive_batch_size > MAX_RECEIVE_BATCH {
            return Err(FilecastError::Config(format!(
                "receive batch size must be between 1 and {}, got {}",
                MAX_RECEIVE_BATCH, self.receive_batch_size
            )));
        }
        if self.receive_wait.is_zero() || self.receive_wait > MAX_RECEIVE_WAIT {
            return Err(FilecastError::Config(format!(
                "receive wait must be between 1s and {}s, got {:?}",
                MAX_RECEIVE_WAIT.as_secs(),
                self.receive_wait
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let zero = PipelineConfig {
            receive_batch_size: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let long_wait = PipelineConfig {
            receive_wait: Duration::from_secs(21),
            ..Default::default()
        };
        assert!(long_wait.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_wait() {
        let busy = PipelineConfig {
            receive_wait: Duration::ZERO,
            ..Default::default()
        };
        let err = busy.validate().unwrap_err();
        assert!(matches!(err, FilecastError::Config(_)));

        let short = PipelineConfig {
            receive_wait: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(short.validate().is_ok());
    }
}
