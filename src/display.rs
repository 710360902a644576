//! Local display of the latest window means.

use chrono::Local;
use std::path::PathBuf;
use tracing::info;

use crate::error::DisplayError;
use crate::sensors::Quantity;
use crate::state::Averages;

/// Placeholder for a quantity with no mean this window
pub const MISSING: &str = "--";

/// Something that can show the current averages
pub trait Display: Send {
    fn render(&mut self, averages: &Averages) -> Result<(), DisplayError>;
}

fn format_value(value: Option<f64>, suffix: &str) -> String {
    match value {
        Some(v) => format!("{:.1}{}", v, suffix),
        None => MISSING.to_string(),
    }
}

/// The four display lines, one per quantity
pub fn display_lines(averages: &Averages) -> [String; 4] {
    [
        format!("Lux: {}", format_value(averages.get(Quantity::Illuminance), "")),
        format!("Temp: {}", format_value(averages.get(Quantity::Temperature), "C")),
        format!("Humidity: {}", format_value(averages.get(Quantity::Humidity), "%")),
        format!("Moisture: {}", format_value(averages.get(Quantity::SoilMoisture), "%")),
    ]
}

/// Writes the display lines to the log
#[derive(Debug, Default)]
pub struct LogDisplay;

impl Display for LogDisplay {
    fn render(&mut self, averages: &Averages) -> Result<(), DisplayError> {
        info!("Display: {}", display_lines(averages).join(" | "));
        Ok(())
    }
}

/// Rewrites a text file with the display lines every window, e.g. for a
/// panel driver that tails it
#[derive(Debug)]
pub struct FileDisplay {
    path: PathBuf,
}

impl FileDisplay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Display for FileDisplay {
    fn render(&mut self, averages: &Averages) -> Result<(), DisplayError> {
        let mut content = display_lines(averages).join("\n");
        content.push_str(&format!("\nUpdated: {}\n", Local::now().format("%H:%M:%S")));

        std::fs::write(&self.path, content).map_err(|source| DisplayError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
