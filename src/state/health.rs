use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::state::{ConnectivityState, FaultTracker};

/// Default bound on time since the last successful publish
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Wire string for a lost link, matching what existing consumers expect
pub const DEFAULT_LINK_DOWN_LABEL: &str = "WiFi Disconnected";

/// Device-level health verdict.
///
/// Always derived from current state, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    PartialDegradation { healthy: usize, total: usize },
    AllSensorsFailed,
    SessionDown,
    LinkDown,
    PublishStale,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "Online"),
            Self::PartialDegradation { healthy, total } => {
                write!(f, "Partial ({}/{} sensors)", healthy, total)
            }
            Self::AllSensorsFailed => write!(f, "All Sensors Failed"),
            Self::SessionDown => write!(f, "MQTT Disconnected"),
            Self::LinkDown => write!(f, "{}", DEFAULT_LINK_DOWN_LABEL),
            Self::PublishStale => write!(f, "Publish Timeout"),
        }
    }
}

/// Folds connectivity, sensor health and publish recency into one status
#[derive(Debug, Clone)]
pub struct HealthEvaluator {
    stale_after: Duration,
    link_down_label: String,
}

impl Default for HealthEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}

impl HealthEvaluator {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            link_down_label: DEFAULT_LINK_DOWN_LABEL.to_string(),
        }
    }

    pub fn with_link_down_label(mut self, label: impl Into<String>) -> Self {
        self.link_down_label = label.into();
        self
    }

    /// Status payload as published on the status topic
    pub fn wire(&self, status: &DeviceStatus) -> String {
        match status {
            DeviceStatus::LinkDown => self.link_down_label.clone(),
            other => other.to_string(),
        }
    }

    /// First matching rule wins: connectivity dominates sensor health,
    /// which dominates staleness.
    pub fn evaluate(
        &self,
        connectivity: &ConnectivityState,
        faults: &FaultTracker,
        now: Instant,
    ) -> DeviceStatus {
        if !connectivity.link_up() {
            return DeviceStatus::LinkDown;
        }
        if !connectivity.session_up() {
            return DeviceStatus::SessionDown;
        }

        let healthy = faults.healthy_count();
        let total = faults.total();
        if healthy == 0 {
            return DeviceStatus::AllSensorsFailed;
        }
        if healthy < total {
            return DeviceStatus::PartialDegradation { healthy, total };
        }

        // Never having published counts as stale
        let stale = match connectivity.last_publish() {
            Some(at) => now.saturating_duration_since(at) > self.stale_after,
            None => true,
        };
        if stale {
            return DeviceStatus::PublishStale;
        }

        DeviceStatus::Online
    }
}
