//! Scenario tests for the scheduler, driven through hand-written fakes
//! of the link, transport and sensors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use plantmon::config::{Config, DeviceConfig};
use plantmon::display::LogDisplay;
use plantmon::error::{LinkError, SensorError, TransportError};
use plantmon::link::Link;
use plantmon::mqtt::{announcements, RetryPolicy, TopicLayout, Transport};
use plantmon::reclaim::{MemoryStats, Reclaimer};
use plantmon::sensors::{Sensor, SensorReading};
use plantmon::state::{Aggregator, DeviceStatus, FaultTracker, HealthEvaluator, NodeState};
use plantmon::{ConnectivityManager, Scheduler};

const STATUS_TOPIC: &str = "homeassistant/sensor/plant/status/state";
const TEMP_TOPIC: &str = "homeassistant/sensor/plant/temperature/state";
const HUMIDITY_TOPIC: &str = "homeassistant/sensor/plant/humidity/state";
const LUX_TOPIC: &str = "homeassistant/sensor/plant/lux/state";

#[derive(Default)]
struct Network {
    link_up: bool,
    broker_up: bool,
    connects: usize,
    /// (topic, payload, retain)
    published: Vec<(String, String, bool)>,
    /// Topics the broker refuses individually
    rejected: Vec<String>,
    /// Fail the next publish as a dropped connection
    drop_next_publish: bool,
}

#[derive(Clone, Default)]
struct SharedNetwork(Arc<Mutex<Network>>);

impl SharedNetwork {
    fn up() -> Self {
        let net = Self::default();
        {
            let mut inner = net.0.lock().unwrap();
            inner.link_up = true;
            inner.broker_up = true;
        }
        net
    }

    fn with<R>(&self, f: impl FnOnce(&mut Network) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }

    fn published_to(&self, topic: &str) -> Vec<String> {
        self.with(|n| {
            n.published
                .iter()
                .filter(|(t, _, _)| t == topic)
                .map(|(_, p, _)| p.clone())
                .collect()
        })
    }

    fn clear_published(&self) {
        self.with(|n| n.published.clear());
    }
}

struct FakeLink(SharedNetwork);

#[async_trait]
impl Link for FakeLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn is_up(&mut self) -> bool {
        self.0.with(|n| n.link_up)
    }
}

struct FakeTransport {
    net: SharedNetwork,
    connected: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let accepted = self.net.with(|n| {
            n.connects += 1;
            n.link_up && n.broker_up
        });
        self.connected = accepted;
        if accepted {
            Ok(())
        } else {
            Err(TransportError::Timeout("connack"))
        }
    }

    fn is_up(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let outcome = self.net.with(|n| {
            if n.drop_next_publish || !n.broker_up {
                n.drop_next_publish = false;
                Err(TransportError::Timeout("publish flush"))
            } else if n.rejected.iter().any(|t| t == topic) {
                Err(TransportError::Rejected(format!("refused {}", topic)))
            } else {
                n.published
                    .push((topic.to_string(), payload.to_string(), retain));
                Ok(())
            }
        });
        if let Err(err) = &outcome {
            if err.is_connection_loss() {
                self.connected = false;
            }
        }
        outcome
    }

    async fn keepalive(&mut self) -> Result<(), TransportError> {
        if self.connected && self.net.with(|n| n.broker_up) {
            Ok(())
        } else {
            self.connected = false;
            Err(TransportError::NotConnected)
        }
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.keepalive().await
    }
}

/// Replays a script of readings, one entry per read; `None` is a failed read
struct ScriptedSensor {
    name: &'static str,
    script: Vec<Option<Vec<SensorReading>>>,
    next: usize,
}

impl ScriptedSensor {
    fn boxed(name: &'static str, script: Vec<Option<Vec<SensorReading>>>) -> Box<dyn Sensor> {
        Box::new(Self {
            name,
            script,
            next: 0,
        })
    }
}

impl Sensor for ScriptedSensor {
    fn name(&self) -> &str {
        self.name
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, SensorError> {
        let entry = self.script[self.next % self.script.len()].clone();
        self.next += 1;
        entry.ok_or_else(|| SensorError::Parse {
            path: format!("/sys/bus/iio/devices/{}", self.name).into(),
            value: "-".to_string(),
        })
    }
}

struct QuietReclaimer;

impl Reclaimer for QuietReclaimer {
    fn reclaim(&mut self) -> Option<MemoryStats> {
        None
    }
}

fn node(net: &SharedNetwork, sensors: Vec<Box<dyn Sensor>>) -> Scheduler<FakeLink, FakeTransport> {
    let config = Config::parse(
        r#"
[mqtt]
host = "broker.local"
client_id = "plant-node"
node_id = "plant"
"#,
    )
    .unwrap();
    let layout = TopicLayout::new(&config.mqtt.discovery_prefix, &config.mqtt.node_id);
    let manager = ConnectivityManager::new(
        FakeLink(net.clone()),
        FakeTransport {
            net: net.clone(),
            connected: false,
        },
        RetryPolicy::new()
            .with_delay(Duration::from_secs(2))
            .with_max_attempts(3),
        announcements(&layout, &DeviceConfig::default()),
    );
    let state = NodeState::new(
        FaultTracker::new(config.sensors.failure_threshold),
        Aggregator::new(config.sensors.window_capacity),
        config.intervals.schedule(),
    );
    Scheduler::new(
        manager,
        state,
        sensors,
        Box::new(LogDisplay),
        Box::new(QuietReclaimer),
        HealthEvaluator::new(config.intervals.stale_after())
            .with_link_down_label(&config.device.link_down_status),
        layout,
        config.intervals.tick(),
    )
}

fn climate(temperatures: &[f64]) -> Box<dyn Sensor> {
    ScriptedSensor::boxed(
        "climate",
        temperatures
            .iter()
            .map(|&t| Some(vec![SensorReading::Temperature(t), SensorReading::Humidity(50.0)]))
            .collect(),
    )
}

fn light() -> Box<dyn Sensor> {
    ScriptedSensor::boxed("light", vec![Some(vec![SensorReading::Illuminance(300.0)])])
}

/// Tick every half second from `from` until `until`
async fn run_ticks(node: &mut Scheduler<FakeLink, FakeTransport>, from: Instant, until: Duration) {
    let mut offset = Duration::ZERO;
    while offset <= until {
        node.tick(from + offset).await;
        offset += Duration::from_millis(500);
    }
}

#[tokio::test]
async fn test_startup_announces_every_entity_and_reports_status() {
    let net = SharedNetwork::up();
    let mut node = node(&net, vec![climate(&[20.0])]);

    let status = node.startup(Instant::now()).await;
    assert_eq!(status, Some(DeviceStatus::PublishStale));

    let configs: Vec<String> = net.with(|n| {
        n.published
            .iter()
            .filter(|(t, _, retain)| t.ends_with("/config") && *retain)
            .map(|(t, _, _)| t.clone())
            .collect()
    });
    assert_eq!(configs.len(), 5);
    assert!(configs.contains(&"homeassistant/sensor/plant/status/config".to_string()));
    assert_eq!(net.published_to(STATUS_TOPIC), vec!["Publish Timeout"]);
}

#[tokio::test]
async fn test_window_means_are_published_and_status_goes_online() {
    let net = SharedNetwork::up();
    let mut node = node(&net, vec![climate(&[10.0, 20.0, 30.0])]);
    let start = Instant::now();
    node.startup(start).await;
    net.clear_published();

    // First tick publishes the single sample taken on it
    node.tick(start).await;
    assert_eq!(net.published_to(TEMP_TOPIC), vec!["10.00"]);

    // Ten reads (6 s apart) land in the next 60 s window: 20,30,10,...,20
    run_ticks(&mut node, start + Duration::from_millis(500), Duration::from_secs(59)).await;
    node.tick(start + Duration::from_secs(60)).await;
    let temps = net.published_to(TEMP_TOPIC);
    assert_eq!(temps.len(), 2);
    assert_eq!(temps[1], "20.00");
    assert_eq!(net.published_to(HUMIDITY_TOPIC), vec!["50.00", "50.00"]);

    assert_eq!(
        node.current_status(start + Duration::from_secs(61)),
        DeviceStatus::Online
    );
    assert!(node.state().aggregator.is_empty());
}

#[tokio::test]
async fn test_rejected_quantity_does_not_block_the_others() {
    let net = SharedNetwork::up();
    net.with(|n| n.rejected.push(HUMIDITY_TOPIC.to_string()));
    let mut node = node(&net, vec![climate(&[21.0]), light()]);
    let start = Instant::now();
    node.startup(start).await;

    let report = node.tick(start).await;

    assert_eq!(report.published, Some(2));
    assert_eq!(net.published_to(TEMP_TOPIC), vec!["21.00"]);
    assert_eq!(net.published_to(LUX_TOPIC), vec!["300.00"]);
    assert!(net.published_to(HUMIDITY_TOPIC).is_empty());
    assert!(node.state().connectivity.session_up());
    assert_eq!(node.state().connectivity.last_publish(), Some(start));
}

#[tokio::test]
async fn test_dropped_session_recovers_at_next_check() {
    let net = SharedNetwork::up();
    let mut node = node(&net, vec![climate(&[21.0])]);
    let start = Instant::now();
    node.startup(start).await;
    net.with(|n| n.drop_next_publish = true);

    // The batch is lost with the session and the windows still empty
    let report = node.tick(start).await;
    assert_eq!(report.published, Some(0));
    assert!(!node.state().connectivity.session_up());
    assert!(node.state().aggregator.is_empty());
    assert_eq!(
        node.current_status(start + Duration::from_secs(1)),
        DeviceStatus::SessionDown
    );

    net.clear_published();
    let report = node.tick(start + Duration::from_secs(60)).await;
    let check = report.health_check.unwrap();
    assert!(check.reconnected);
    assert!(check.session_changed);
    assert!(node.state().connectivity.session_up());
    assert_eq!(net.with(|n| n.connects), 2);
    assert_eq!(net.published_to(STATUS_TOPIC).len(), 1);
    assert_eq!(net.published_to(TEMP_TOPIC), vec!["21.00"]);
}

#[tokio::test]
async fn test_failing_sensor_degrades_status() {
    let net = SharedNetwork::up();
    let flaky = ScriptedSensor::boxed("light", vec![None]);
    let mut node = node(&net, vec![climate(&[21.0]), flaky]);
    let start = Instant::now();
    node.startup(start).await;

    run_ticks(&mut node, start, Duration::from_secs(30)).await;

    assert!(!node.state().faults.is_healthy("light"));
    assert_eq!(
        node.current_status(start + Duration::from_secs(30)),
        DeviceStatus::PartialDegradation {
            healthy: 1,
            total: 2
        }
    );
    assert_eq!(
        node.current_status(start + Duration::from_secs(30)).to_string(),
        "Partial (1/2 sensors)"
    );
}

#[tokio::test]
async fn test_status_goes_stale_without_publishes() {
    let net = SharedNetwork::up();
    let mut node = node(&net, vec![climate(&[21.0])]);
    let start = Instant::now();
    node.startup(start).await;
    node.tick(start).await;
    assert_eq!(node.state().connectivity.last_publish(), Some(start));

    net.with(|n| n.rejected.extend([TEMP_TOPIC.to_string(), HUMIDITY_TOPIC.to_string()]));
    for minute in 1..=7 {
        node.tick(start + Duration::from_secs(60 * minute)).await;
    }

    assert!(node.state().connectivity.session_up());
    assert_eq!(
        node.current_status(start + Duration::from_secs(400)),
        DeviceStatus::PublishStale
    );
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_skips_session_and_recovers() {
    let net = SharedNetwork::up();
    let mut node = node(&net, vec![climate(&[21.0])]);
    let start = Instant::now();
    node.startup(start).await;
    node.tick(start).await;

    net.with(|n| {
        n.link_up = false;
        n.broker_up = false;
    });
    let report = node.tick(start + Duration::from_secs(60)).await;
    assert_eq!(report.keepalive, Some(false));
    let check = report.health_check.unwrap();
    assert!(check.link_changed);
    assert!(!node.state().connectivity.link_up());
    assert_eq!(
        node.current_status(start + Duration::from_secs(60)),
        DeviceStatus::LinkDown
    );
    let connects = net.with(|n| n.connects);
    assert_eq!(connects, 1);

    net.with(|n| {
        n.link_up = true;
        n.broker_up = true;
    });
    let report = node.tick(start + Duration::from_secs(120)).await;
    let check = report.health_check.unwrap();
    assert!(check.link_changed);
    assert!(check.reconnected);
    assert!(node.state().connectivity.session_up());
    assert_eq!(net.with(|n| n.connects), 2);
}
