//! The tick loop driving the five periodic activities.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connectivity::{ConnectivityManager, HealthCheck, SessionOutcome};
use crate::display::Display;
use crate::link::Link;
use crate::mqtt::{TopicLayout, Transport};
use crate::reclaim::{MemoryStats, Reclaimer};
use crate::sensors::Sensor;
use crate::state::{DeviceStatus, HealthEvaluator, NodeState};

/// What one tick did, step by step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Keepalive outcome, when a session was up
    pub keepalive: Option<bool>,
    /// Set when the reclamation timer fired
    pub reclaimed: Option<Option<MemoryStats>>,
    pub health_check: Option<HealthCheck>,
    /// Every status published this tick, in order
    pub statuses: Vec<DeviceStatus>,
    /// Readings aggregated, when the sensor timer fired
    pub readings: Option<usize>,
    /// Quantities published, when the publish timer fired
    pub published: Option<usize>,
}

/// Owns the node state and every collaborator; single task, no locks
pub struct Scheduler<L, T> {
    manager: ConnectivityManager<L, T>,
    state: NodeState,
    sensors: Vec<Box<dyn Sensor>>,
    display: Box<dyn Display>,
    reclaimer: Box<dyn Reclaimer>,
    evaluator: HealthEvaluator,
    layout: TopicLayout,
    tick: Duration,
}

impl<L: Link, T: Transport> Scheduler<L, T> {
    /// Every sensor handed in becomes a known sensor of the fault tracker
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: ConnectivityManager<L, T>,
        mut state: NodeState,
        sensors: Vec<Box<dyn Sensor>>,
        display: Box<dyn Display>,
        reclaimer: Box<dyn Reclaimer>,
        evaluator: HealthEvaluator,
        layout: TopicLayout,
        tick: Duration,
    ) -> Self {
        for sensor in &sensors {
            state.faults.register(sensor.name());
        }
        Self {
            manager,
            state,
            sensors,
            display,
            reclaimer,
            evaluator,
            layout,
            tick,
        }
    }

    /// One attempt at link, session and status before the loop starts.
    /// Nothing here is fatal; the health check retries what failed.
    pub async fn startup(&mut self, now: Instant) -> Option<DeviceStatus> {
        if !self.manager.ensure_link(&mut self.state.connectivity).await {
            warn!("Initial link connection failed, will retry in loop");
        }
        let status = match self.manager.ensure_session(&mut self.state.connectivity).await {
            SessionOutcome::Connected | SessionOutcome::AlreadyUp => {
                Some(self.report_status(now).await)
            }
            outcome => {
                warn!("Initial MQTT connection failed ({:?}), will retry in loop", outcome);
                None
            }
        };
        self.state.timers.connectivity_check.reset(now);
        if status.is_some() {
            self.state.timers.status_report.reset(now);
        }
        status
    }

    /// Run the due activities for `now`, in priority order
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        if self.state.connectivity.session_up() {
            let alive = self.manager.keepalive(&mut self.state.connectivity).await;
            report.keepalive = Some(alive);
        }

        if self.state.timers.reclaim.fire(now) {
            self.state.aggregator.shrink();
            report.reclaimed = Some(self.reclaimer.reclaim());
        }

        if self.state.timers.connectivity_check.fire(now) {
            let check = self
                .manager
                .periodic_health_check(&mut self.state.connectivity)
                .await;
            if check.needs_status_report() {
                report.statuses.push(self.report_status(now).await);
            }
            report.health_check = Some(check);
        }

        if self.state.timers.status_report.fire(now) {
            report.statuses.push(self.report_status(now).await);
        }

        if self.state.timers.sensor_read.fire(now) {
            report.readings = Some(self.read_sensors());
        }

        if self.state.timers.publish.fire(now) {
            report.published = Some(self.publish_window(now).await);
        }

        report
    }

    /// Tick forever on the tokio clock
    pub async fn run(&mut self) {
        info!("Starting sensor loop...");
        loop {
            self.tick(Instant::now()).await;
            tokio::time::sleep(self.tick).await;
        }
    }

    /// Evaluate and publish the device status, retained
    pub async fn report_status(&mut self, now: Instant) -> DeviceStatus {
        let status = self
            .evaluator
            .evaluate(&self.state.connectivity, &self.state.faults, now);
        let topic = self.layout.status_topic();
        let payload = self.evaluator.wire(&status);
        if self
            .manager
            .publish(&mut self.state.connectivity, &topic, &payload, true)
            .await
        {
            info!("Device status: {}", payload);
        } else {
            debug!("Device status {} not published", payload);
        }
        status
    }

    fn read_sensors(&mut self) -> usize {
        let mut count = 0;
        for sensor in self.sensors.iter_mut() {
            let outcome = sensor.read();
            if let Some(readings) = self.state.faults.record(sensor.name(), outcome) {
                for reading in readings {
                    self.state
                        .aggregator
                        .add(reading.quantity(), Some(reading.value()));
                    count += 1;
                }
            }
        }
        debug!("Aggregated {} readings", count);
        count
    }

    async fn publish_window(&mut self, now: Instant) -> usize {
        // Draining empties every window whatever happens to the publish
        let averages = self.state.aggregator.drain_all();

        if let Err(err) = self.display.render(&averages) {
            warn!("Display update failed: {}", err);
        }
        info!(
            "Calculated averages -> {}",
            averages
                .present()
                .map(|(q, v)| format!("{}: {:.2}", q.descriptor().id, v))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let items: Vec<(String, String)> = averages
            .present()
            .map(|(quantity, value)| (self.layout.quantity_topic(quantity), format!("{:.2}", value)))
            .collect();
        if items.is_empty() {
            debug!("No readings this window, nothing to publish");
            return 0;
        }

        let published = self
            .manager
            .publish_batch(&mut self.state.connectivity, &items, true, now)
            .await;
        if published > 0 {
            info!("Successfully published {}/{} sensor values", published, items.len());
        } else {
            warn!("Published none of {} sensor values", items.len());
        }
        published
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    pub fn current_status(&self, now: Instant) -> DeviceStatus {
        self.evaluator
            .evaluate(&self.state.connectivity, &self.state.faults, now)
    }
}
