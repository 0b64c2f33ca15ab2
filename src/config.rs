//! Group configuration

use std::time::Duration;

/// Configuration for a task or observer group.
#[derive(Clone, Debug)]
pub struct GroupConfig {
    /// Wall-clock bound on `start`. `None` never times out.
    pub timeout: Option<Duration>,
    /// Jobs a single `start` may run before failing. `None` is unbounded.
    pub job_limit: Option<usize>,
    /// Jobs run between yields to the host runtime.
    pub yield_interval: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            job_limit: None,
            yield_interval: 64,
        }
    }
}

impl GroupConfig {
    /// Default configuration bounded by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }
}
