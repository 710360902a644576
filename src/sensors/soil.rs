use serde::{Deserialize, Serialize};

/// Raw ADC extremes of a capacitive soil sensor.
///
/// Capacitive sensors read higher when dry, so `dry` is normally above
/// `wet`; the mapping works in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoilCalibration {
    #[serde(rename = "soil_dry", default = "default_dry")]
    pub dry: u32,
    #[serde(rename = "soil_wet", default = "default_wet")]
    pub wet: u32,
}

fn default_dry() -> u32 {
    41000
}

fn default_wet() -> u32 {
    18000
}

impl Default for SoilCalibration {
    fn default() -> Self {
        Self {
            dry: default_dry(),
            wet: default_wet(),
        }
    }
}

impl SoilCalibration {
    pub fn new(dry: u32, wet: u32) -> Self {
        Self { dry, wet }
    }

    /// Map a raw reading to a moisture percentage, clamped to 0..=100.
    ///
    /// `dry` maps to 0 and `wet` to 100; intermediate values truncate.
    /// Callers must not construct a calibration with `dry == wet`.
    pub fn percent(&self, raw: u32) -> u8 {
        let dry = i64::from(self.dry);
        let wet = i64::from(self.wet);
        let (lo, hi) = if dry < wet { (dry, wet) } else { (wet, dry) };
        let raw = i64::from(raw).clamp(lo, hi);

        let pct = (dry - raw) * 100 / (dry - wet);
        pct.clamp(0, 100) as u8
    }
}
