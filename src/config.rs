use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mqtt::resilience::RetryPolicy;
use crate::sensors::SoilCalibration;
use crate::state::aggregator::DEFAULT_WINDOW_CAPACITY;
use crate::state::fault_tracker::DEFAULT_FAILURE_THRESHOLD;
use crate::state::health::DEFAULT_LINK_DOWN_LABEL;
use crate::state::Intervals;

/// Node configuration, read once at startup and immutable afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    #[serde(default)]
    pub calibration: SoilCalibration,
    #[serde(default)]
    pub intervals: IntervalConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Bound on connect, flush and ping waits
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    /// Identifier used in topics, unique ids and the device block
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Network interface to watch (e.g. "wlan0"); when unset the link is
    /// considered up while any non-loopback interface is up
    pub interface: Option<String>,
    #[serde(default = "default_link_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_link_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            max_attempts: default_link_attempts(),
            retry_delay_secs: default_link_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// IIO device directory of the temperature/humidity sensor
    pub climate: Option<PathBuf>,
    /// IIO device directory of the light sensor
    pub light: Option<PathBuf>,
    /// Raw ADC channel attribute of the soil sensor
    pub soil: Option<PathBuf>,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Maximum samples kept per quantity between publishes
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            climate: None,
            light: None,
            soil: None,
            failure_threshold: default_failure_threshold(),
            window_capacity: default_window_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_sensor_read")]
    pub sensor_read_secs: u64,
    #[serde(default = "default_publish")]
    pub publish_secs: u64,
    #[serde(default = "default_connectivity_check")]
    pub connectivity_check_secs: u64,
    #[serde(default = "default_status")]
    pub status_secs: u64,
    #[serde(default = "default_reclaim")]
    pub reclaim_secs: u64,
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            sensor_read_secs: default_sensor_read(),
            publish_secs: default_publish(),
            connectivity_check_secs: default_connectivity_check(),
            status_secs: default_status(),
            reclaim_secs: default_reclaim(),
            stale_after_secs: default_stale_after(),
        }
    }
}

/// Identity block shared by every discovery announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_sw_version")]
    pub sw_version: String,
    /// Status payload reported while the network link is down
    #[serde(default = "default_link_down_status")]
    pub link_down_status: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            manufacturer: default_manufacturer(),
            model: default_model(),
            sw_version: default_sw_version(),
            link_down_status: default_link_down_status(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Text file rewritten with the display lines every publish window;
    /// lines go to the log when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Warn when available system memory drops below this
    #[serde(default = "default_low_memory_kb")]
    pub low_memory_kb: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            low_memory_kb: default_low_memory_kb(),
        }
    }
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    120
}

fn default_io_timeout() -> u64 {
    5000
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_node_id() -> String {
    "plantmon_01".to_string()
}

fn default_link_attempts() -> u32 {
    10
}

fn default_link_retry_delay() -> u64 {
    2
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_tick_ms() -> u64 {
    500
}

fn default_sensor_read() -> u64 {
    6
}

fn default_publish() -> u64 {
    60
}

fn default_connectivity_check() -> u64 {
    60
}

fn default_status() -> u64 {
    300
}

fn default_reclaim() -> u64 {
    300
}

fn default_stale_after() -> u64 {
    300
}

fn default_device_name() -> String {
    "Plant Sensor".to_string()
}

fn default_manufacturer() -> String {
    "plantmon".to_string()
}

fn default_model() -> String {
    "Linux SBC".to_string()
}

fn default_sw_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_link_down_status() -> String {
    DEFAULT_LINK_DOWN_LABEL.to_string()
}

fn default_low_memory_kb() -> u64 {
    10 * 1024
}

impl Config {
    /// Get the default config directory path (~/.config/plantmon/)
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("plantmon")
    }

    /// Get the default config file path (~/.config/plantmon/config.toml)
    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.toml")
    }

    /// Find config file using fallback chain:
    /// 1. If explicit path provided, use it
    /// 2. If ./config.toml exists in current directory, use it
    /// 3. Otherwise use ~/.config/plantmon/config.toml
    pub fn find_config_path(explicit_path: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit_path {
            return path.to_path_buf();
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return local_config;
        }

        Self::default_path()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config = Self::parse(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).with_context(|| "Failed to parse config file")
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            bail!("MQTT broker host cannot be empty");
        }
        if self.mqtt.client_id.trim().is_empty() {
            bail!("MQTT client_id cannot be empty");
        }
        if self.mqtt.node_id.trim().is_empty() {
            bail!("MQTT node_id cannot be empty");
        }
        if self.mqtt.node_id.contains(&['/', '+', '#'][..]) {
            bail!("MQTT node_id must not contain '/', '+' or '#'");
        }
        if self.mqtt.io_timeout_ms == 0 {
            bail!("MQTT io_timeout_ms must be positive");
        }

        let intervals = &self.intervals;
        for (name, value) in [
            ("tick_ms", intervals.tick_ms),
            ("sensor_read_secs", intervals.sensor_read_secs),
            ("publish_secs", intervals.publish_secs),
            ("connectivity_check_secs", intervals.connectivity_check_secs),
            ("status_secs", intervals.status_secs),
            ("reclaim_secs", intervals.reclaim_secs),
            ("stale_after_secs", intervals.stale_after_secs),
        ] {
            if value == 0 {
                bail!("Interval {} must be positive", name);
            }
        }

        if self.calibration.dry == self.calibration.wet {
            bail!(
                "Soil calibration dry and wet bounds must differ (both {})",
                self.calibration.dry
            );
        }
        if self.sensors.failure_threshold == 0 {
            bail!("Sensor failure_threshold must be at least 1");
        }
        if self.sensors.window_capacity == 0 {
            bail!("Sensor window_capacity must be at least 1");
        }
        if self.link.max_attempts == 0 {
            bail!("Link max_attempts must be at least 1");
        }
        if self.device.link_down_status.trim().is_empty() {
            bail!("Device link_down_status cannot be empty");
        }
        Ok(())
    }
}

impl MqttConfig {
    /// Bound applied to connect, flush and ping waits
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl LinkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_delay(Duration::from_secs(self.retry_delay_secs))
            .with_max_attempts(self.max_attempts)
    }
}

impl IntervalConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn schedule(&self) -> Intervals {
        Intervals {
            sensor_read: Duration::from_secs(self.sensor_read_secs),
            publish: Duration::from_secs(self.publish_secs),
            connectivity_check: Duration::from_secs(self.connectivity_check_secs),
            status_report: Duration::from_secs(self.status_secs),
            reclaim: Duration::from_secs(self.reclaim_secs),
        }
    }
}
