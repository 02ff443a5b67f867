use std::time::Duration;

/// Identifies one execution of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    pub job_id: String,
    /// Stable across redeliveries of the same task.
    pub task_id: String,
    /// Starts at 1.
    pub attempt: u32,
}

/// Fixed-delay retry of transient stage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub enabled: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            enabled: true,
        }
    }

    /// Fail fast: every error is final.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
            enabled: false,
        }
    }

    /// Whether a failed `attempt` may be followed by another one.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt <= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}
