pub mod soil;
pub mod sysfs;

pub use soil::SoilCalibration;
pub use sysfs::{IioClimateSensor, IioLightSensor, IioSoilSensor};

use tracing::{info, warn};

use crate::error::SensorError;

/// A measured quantity reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantity {
    Temperature,
    Humidity,
    Illuminance,
    SoilMoisture,
}

/// Static reporting metadata for a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Entity id used in topics and unique ids
    pub id: &'static str,
    pub name: &'static str,
    pub unit: &'static str,
    pub device_class: &'static str,
}

impl Quantity {
    /// Every quantity, in publish order
    pub const ALL: [Quantity; 4] = [
        Quantity::Temperature,
        Quantity::Humidity,
        Quantity::Illuminance,
        Quantity::SoilMoisture,
    ];

    pub fn descriptor(&self) -> Descriptor {
        match self {
            Self::Temperature => Descriptor {
                id: "temperature",
                name: "Temperature",
                unit: "°C",
                device_class: "temperature",
            },
            Self::Humidity => Descriptor {
                id: "humidity",
                name: "Humidity",
                unit: "%",
                device_class: "humidity",
            },
            Self::Illuminance => Descriptor {
                id: "lux",
                name: "Light Level",
                unit: "lx",
                device_class: "illuminance",
            },
            Self::SoilMoisture => Descriptor {
                id: "soil_moisture",
                name: "Soil Moisture",
                unit: "%",
                device_class: "moisture",
            },
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Temperature => 0,
            Self::Humidity => 1,
            Self::Illuminance => 2,
            Self::SoilMoisture => 3,
        }
    }
}

/// A single valid reading produced by a driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    /// Degrees Celsius
    Temperature(f64),
    /// Relative humidity, percent
    Humidity(f64),
    /// Lux
    Illuminance(f64),
    /// Normalized percent, 0-100
    SoilMoisture(u8),
}

impl SensorReading {
    pub fn quantity(&self) -> Quantity {
        match self {
            Self::Temperature(_) => Quantity::Temperature,
            Self::Humidity(_) => Quantity::Humidity,
            Self::Illuminance(_) => Quantity::Illuminance,
            Self::SoilMoisture(_) => Quantity::SoilMoisture,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            Self::Temperature(v) | Self::Humidity(v) | Self::Illuminance(v) => v,
            Self::SoilMoisture(pct) => f64::from(pct),
        }
    }
}

/// A sensor driver: attempt one reading, return values or a failure.
///
/// One physical device may yield more than one quantity per read (a
/// climate sensor reports temperature and humidity together).
pub trait Sensor: Send {
    /// Name used for failure tracking
    fn name(&self) -> &str;

    fn read(&mut self) -> Result<Vec<SensorReading>, SensorError>;
}

/// Give every driver one test read; drivers that fail are dropped and
/// never become known sensors
pub fn verify_at_startup(sensors: Vec<Box<dyn Sensor>>) -> Vec<Box<dyn Sensor>> {
    sensors
        .into_iter()
        .filter_map(|mut sensor| match sensor.read() {
            Ok(readings) => {
                info!("{} initialized ({} values)", sensor.name(), readings.len());
                Some(sensor)
            }
            Err(err) => {
                warn!("{} initialization failed: {}", sensor.name(), err);
                None
            }
        })
        .collect()
}
