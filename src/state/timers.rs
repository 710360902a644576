use std::time::Duration;

use tokio::time::Instant;

/// A periodic timer compared against the tick clock
#[derive(Debug, Clone, Copy)]
pub struct IntervalTimer {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl IntervalTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    /// A timer that has never fired is due immediately
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_fired {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.last_fired = Some(now);
    }

    /// Fires and resets when due
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.reset(now);
            true
        } else {
            false
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Intervals of the five scheduled activities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub sensor_read: Duration,
    pub publish: Duration,
    pub connectivity_check: Duration,
    pub status_report: Duration,
    pub reclaim: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            sensor_read: Duration::from_secs(6),
            publish: Duration::from_secs(60),
            connectivity_check: Duration::from_secs(60),
            status_report: Duration::from_secs(300),
            reclaim: Duration::from_secs(300),
        }
    }
}

/// One independent timer per activity; none resets another
#[derive(Debug, Clone)]
pub struct Timers {
    pub sensor_read: IntervalTimer,
    pub publish: IntervalTimer,
    pub connectivity_check: IntervalTimer,
    pub status_report: IntervalTimer,
    pub reclaim: IntervalTimer,
}

impl Timers {
    pub fn new(intervals: Intervals) -> Self {
        Self {
            sensor_read: IntervalTimer::new(intervals.sensor_read),
            publish: IntervalTimer::new(intervals.publish),
            connectivity_check: IntervalTimer::new(intervals.connectivity_check),
            status_report: IntervalTimer::new(intervals.status_report),
            reclaim: IntervalTimer::new(intervals.reclaim),
        }
    }
}
