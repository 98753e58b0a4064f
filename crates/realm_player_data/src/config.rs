//! Tuning knobs for the executor and save pipeline.

use std::time::Duration;

/// Runtime settings for [`PlayerDataService`](crate::PlayerDataService).
#[derive(Debug, Clone)]
pub struct PlayerDataConfig {
    /// Maximum number of persistence tasks running at once
    pub max_concurrent_io: usize,
    /// Operations slower than this are logged as warnings
    pub slow_operation_warn: Duration,
    /// Extra attempts after a failed save before an operator alert is raised
    pub save_retry_attempts: u32,
    /// Delay between save attempts, doubled after each failure
    pub save_retry_backoff: Duration,
}

impl Default for PlayerDataConfig {
    fn default() -> Self {
        Self {
            max_concurrent_io: 4,
            slow_operation_warn: Duration::from_millis(250),
            save_retry_attempts: 3,
            save_retry_backoff: Duration::from_millis(100),
        }
    }
}
