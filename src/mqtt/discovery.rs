//! Topic layout and discovery announcements.
//!
//! Every entity (one per quantity plus the device status) gets a state
//! topic and a retained config topic describing its unit, device class
//! and the shared device identity block, in the layout consumed by Home
//! Assistant's MQTT discovery.

use serde::Serialize;

use crate::config::DeviceConfig;
use crate::sensors::Quantity;

/// Entity id of the device status sensor
pub const STATUS_ENTITY: &str = "status";

const STATUS_NAME: &str = "Device Status";
const STATUS_ICON: &str = "mdi:check-circle";

/// A retained config message declaring one entity's schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub topic: String,
    pub payload: String,
}

/// Builds topic names under `<prefix>/sensor/<node_id>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    prefix: String,
    node_id: String,
}

impl TopicLayout {
    pub fn new(prefix: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            node_id: node_id.into(),
        }
    }

    fn base(&self, entity: &str) -> String {
        format!("{}/sensor/{}/{}", self.prefix, self.node_id, entity)
    }

    pub fn state_topic(&self, entity: &str) -> String {
        format!("{}/state", self.base(entity))
    }

    pub fn config_topic(&self, entity: &str) -> String {
        format!("{}/config", self.base(entity))
    }

    pub fn quantity_topic(&self, quantity: Quantity) -> String {
        self.state_topic(quantity.descriptor().id)
    }

    pub fn status_topic(&self) -> String {
        self.state_topic(STATUS_ENTITY)
    }

    /// Topic of the one-off message published right after connecting
    pub fn test_topic(&self) -> String {
        self.state_topic("test")
    }

    pub fn unique_id(&self, entity: &str) -> String {
        format!("{}_{}", self.node_id, entity)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[derive(Debug, Serialize)]
struct DeviceBlock<'a> {
    identifiers: [&'a str; 1],
    name: &'a str,
    manufacturer: &'a str,
    model: &'a str,
    sw_version: &'a str,
}

#[derive(Debug, Serialize)]
struct DiscoveryConfig<'a> {
    name: &'a str,
    state_topic: String,
    unique_id: String,
    device: DeviceBlock<'a>,
    force_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
}

/// Discovery configs for every quantity and the status entity
pub fn announcements(layout: &TopicLayout, device: &DeviceConfig) -> Vec<Announcement> {
    let device_block = move || DeviceBlock {
        identifiers: [layout.node_id()],
        name: &device.name,
        manufacturer: &device.manufacturer,
        model: &device.model,
        sw_version: &device.sw_version,
    };

    let mut configs: Vec<(String, DiscoveryConfig<'_>)> = Quantity::ALL
        .iter()
        .map(|quantity| {
            let desc = quantity.descriptor();
            (
                layout.config_topic(desc.id),
                DiscoveryConfig {
                    name: desc.name,
                    state_topic: layout.state_topic(desc.id),
                    unique_id: layout.unique_id(desc.id),
                    device: device_block(),
                    force_update: true,
                    device_class: Some(desc.device_class),
                    unit_of_measurement: Some(desc.unit),
                    state_class: Some("measurement"),
                    icon: None,
                },
            )
        })
        .collect();

    configs.push((
        layout.config_topic(STATUS_ENTITY),
        DiscoveryConfig {
            name: STATUS_NAME,
            state_topic: layout.status_topic(),
            unique_id: layout.unique_id(STATUS_ENTITY),
            device: device_block(),
            force_update: true,
            device_class: None,
            unit_of_measurement: None,
            state_class: None,
            icon: Some(STATUS_ICON),
        },
    ));

    configs
        .into_iter()
        .filter_map(|(topic, config)| match serde_json::to_string(&config) {
            Ok(payload) => Some(Announcement { topic, payload }),
            Err(err) => {
                tracing::error!("Failed to encode discovery config for {}: {}", topic, err);
                None
            }
        })
        .collect()
}
