use std::time::Duration;

/// Fixed-delay retry policy with a hard attempt bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts
    delay: Duration,
    /// Attempts before giving up
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay before the given attempt (1-indexed), None once exhausted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            None
        } else {
            Some(self.delay)
        }
    }

    /// Check if we should continue trying after given number of attempts
    pub fn should_continue(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Session connection statistics, for logging
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Current number of consecutive failed connects
    consecutive_failures: u32,
    /// Total number of successful connections
    total_connections: u64,
    /// Connections established after at least one failure or loss
    total_reconnects: u64,
    /// Last error message
    last_error: Option<String>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful connection
    pub fn record_success(&mut self) {
        if self.total_connections > 0 || self.consecutive_failures > 0 {
            self.total_reconnects += 1;
        }
        self.consecutive_failures = 0;
        self.total_connections += 1;
        self.last_error = None;
    }

    /// Record a failed connect or a lost session
    pub fn record_failure(&mut self, error: String) {
        self.consecutive_failures += 1;
        self.last_error = Some(error);
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections
    }

    pub fn total_reconnects(&self) -> u64 {
        self.total_reconnects
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
