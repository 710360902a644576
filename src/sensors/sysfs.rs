//! Sensor drivers backed by the Linux IIO sysfs interface.
//!
//! The kernel exposes each device under `/sys/bus/iio/devices/iio:deviceN/`
//! with one attribute file per channel. Reads are plain file reads, so a
//! missing or wedged device fails fast with an I/O error instead of
//! blocking the tick.

use std::path::{Path, PathBuf};

use crate::error::SensorError;
use crate::sensors::{Sensor, SensorReading, SoilCalibration};

const TEMPERATURE_RANGE: (f64, f64) = (-40.0, 80.0);
const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

/// Read a numeric sysfs attribute
pub fn read_attribute(path: &Path) -> Result<f64, SensorError> {
    let contents = std::fs::read_to_string(path).map_err(|source| SensorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = contents.trim();
    trimmed.parse::<f64>().map_err(|_| SensorError::Parse {
        path: path.to_path_buf(),
        value: trimmed.to_string(),
    })
}

fn check_range(quantity: &'static str, value: f64, range: (f64, f64)) -> Result<f64, SensorError> {
    if value.is_finite() && value >= range.0 && value <= range.1 {
        Ok(value)
    } else {
        Err(SensorError::Implausible { quantity, value })
    }
}

/// Combined temperature/humidity sensor (e.g. the `dht11` IIO driver).
///
/// Both channels are reported in milli-units.
#[derive(Debug)]
pub struct IioClimateSensor {
    name: String,
    device: PathBuf,
}

impl IioClimateSensor {
    pub fn new(name: impl Into<String>, device: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            device: device.into(),
        }
    }
}

impl Sensor for IioClimateSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, SensorError> {
        let temp = read_attribute(&self.device.join("in_temp_input"))? / 1000.0;
        let hum = read_attribute(&self.device.join("in_humidityrelative_input"))? / 1000.0;

        let temp = check_range("temperature", temp, TEMPERATURE_RANGE)?;
        let hum = check_range("humidity", hum, HUMIDITY_RANGE)?;

        Ok(vec![
            SensorReading::Temperature(temp),
            SensorReading::Humidity(hum),
        ])
    }
}

/// Ambient light sensor (e.g. the `bh1750` IIO driver)
#[derive(Debug)]
pub struct IioLightSensor {
    name: String,
    device: PathBuf,
}

impl IioLightSensor {
    pub fn new(name: impl Into<String>, device: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            device: device.into(),
        }
    }

    fn read_lux(&self) -> Result<f64, SensorError> {
        // Processed channel when the driver offers one, raw * scale otherwise
        let processed = self.device.join("in_illuminance_input");
        if processed.exists() {
            return read_attribute(&processed);
        }
        let raw = read_attribute(&self.device.join("in_illuminance_raw"))?;
        let scale_path = self.device.join("in_illuminance_scale");
        let scale = if scale_path.exists() {
            read_attribute(&scale_path)?
        } else {
            1.0
        };
        Ok(raw * scale)
    }
}

impl Sensor for IioLightSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, SensorError> {
        let lux = self.read_lux()?;
        let lux = check_range("illuminance", lux, (0.0, f64::MAX))?;
        Ok(vec![SensorReading::Illuminance(lux)])
    }
}

/// Capacitive soil moisture sensor on an ADC channel
#[derive(Debug)]
pub struct IioSoilSensor {
    name: String,
    channel: PathBuf,
    calibration: SoilCalibration,
}

impl IioSoilSensor {
    /// `channel` is the raw attribute, e.g. `.../iio:device2/in_voltage0_raw`
    pub fn new(
        name: impl Into<String>,
        channel: impl Into<PathBuf>,
        calibration: SoilCalibration,
    ) -> Self {
        Self {
            name: name.into(),
            channel: channel.into(),
            calibration,
        }
    }
}

impl Sensor for IioSoilSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, SensorError> {
        let raw = read_attribute(&self.channel)?;
        if !raw.is_finite() || raw < 0.0 {
            return Err(SensorError::Implausible {
                quantity: "soil moisture",
                value: raw,
            });
        }
        let pct = self.calibration.percent(raw.min(u32::MAX as f64) as u32);
        Ok(vec![SensorReading::SoilMoisture(pct)])
    }
}
