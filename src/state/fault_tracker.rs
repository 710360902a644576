use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::SensorError;

/// Consecutive failures after which a sensor counts as unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Tracks consecutive read failures per named sensor.
///
/// This is where sensor faults stop: a failed read becomes `None` and a
/// bumped counter, so one broken sensor never halts the others.
#[derive(Debug, Clone)]
pub struct FaultTracker {
    failures: BTreeMap<String, u32>,
    threshold: u32,
}

impl Default for FaultTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl FaultTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: BTreeMap::new(),
            threshold,
        }
    }

    /// Declare a known sensor with a clean record
    pub fn register(&mut self, sensor: &str) {
        self.failures.entry(sensor.to_string()).or_insert(0);
    }

    /// Record the outcome of a read attempt
    pub fn record<T>(&mut self, sensor: &str, outcome: Result<T, SensorError>) -> Option<T> {
        let count = self.failures.entry(sensor.to_string()).or_insert(0);
        match outcome {
            Ok(value) => {
                if *count > 0 {
                    debug!("{} recovered after {} failed reads", sensor, count);
                }
                *count = 0;
                Some(value)
            }
            Err(err) => {
                *count = count.saturating_add(1);
                if *count >= self.threshold {
                    warn!("{} sensor failed {} times: {}", sensor, count, err);
                } else {
                    debug!("{} read failed ({}): {}", sensor, count, err);
                }
                None
            }
        }
    }

    pub fn failure_count(&self, sensor: &str) -> u32 {
        self.failures.get(sensor).copied().unwrap_or(0)
    }

    pub fn is_healthy(&self, sensor: &str) -> bool {
        self.failure_count(sensor) < self.threshold
    }

    /// Number of known sensors currently below the threshold
    pub fn healthy_count(&self) -> usize {
        self.failures
            .values()
            .filter(|&&count| count < self.threshold)
            .count()
    }

    /// Number of known sensors
    pub fn total(&self) -> usize {
        self.failures.len()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
