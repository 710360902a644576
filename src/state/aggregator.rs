use std::collections::VecDeque;

use crate::sensors::Quantity;

/// Default per-quantity window capacity
pub const DEFAULT_WINDOW_CAPACITY: usize = 256;

/// Window means produced by one publish cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Averages {
    values: [Option<f64>; 4],
}

impl Averages {
    pub fn new(
        temperature: Option<f64>,
        humidity: Option<f64>,
        illuminance: Option<f64>,
        soil_moisture: Option<f64>,
    ) -> Self {
        Self {
            values: [temperature, humidity, illuminance, soil_moisture],
        }
    }

    pub fn get(&self, quantity: Quantity) -> Option<f64> {
        self.values[quantity.index()]
    }

    /// Quantities that produced a mean, in publish order
    pub fn present(&self) -> impl Iterator<Item = (Quantity, f64)> + '_ {
        Quantity::ALL
            .iter()
            .filter_map(move |&q| self.get(q).map(|v| (q, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

/// Accumulates readings per quantity between publishes.
///
/// Windows are bounded; once full, the oldest sample is dropped.
#[derive(Debug)]
pub struct Aggregator {
    windows: [VecDeque<f64>; 4],
    capacity: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl Aggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: Default::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn add(&mut self, quantity: Quantity, value: Option<f64>) {
        let Some(value) = value else {
            return;
        };
        let window = &mut self.windows[quantity.index()];
        if window.len() >= self.capacity {
            window.pop_front();
        }
        window.push_back(value);
    }

    /// Mean of the quantity's window, emptying it
    pub fn drain_mean(&mut self, quantity: Quantity) -> Option<f64> {
        let window = &mut self.windows[quantity.index()];
        if window.is_empty() {
            return None;
        }
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        window.clear();
        Some(mean)
    }

    /// Means of every window; all windows are empty afterwards
    pub fn drain_all(&mut self) -> Averages {
        let mut averages = Averages::default();
        for quantity in Quantity::ALL {
            averages.values[quantity.index()] = self.drain_mean(quantity);
        }
        averages
    }

    pub fn len(&self, quantity: Quantity) -> usize {
        self.windows[quantity.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.iter().all(VecDeque::is_empty)
    }

    /// Release spare window capacity
    pub fn shrink(&mut self) {
        for window in &mut self.windows {
            window.shrink_to_fit();
        }
    }
}
