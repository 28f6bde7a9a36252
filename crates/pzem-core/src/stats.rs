use serde::Serialize;

use crate::sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
    Power,
    Energy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

/// Running sum plus bounds; `bounds` stays `None` until the first value arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Tracked {
    sum: f64,
    bounds: Option<Bounds>,
}

impl Tracked {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.bounds = Some(match self.bounds {
            None => Bounds {
                min: value,
                max: value,
            },
            Some(b) => Bounds {
                min: b.min.min(value),
                max: b.max.max(value),
            },
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationWindow {
    voltage: Tracked,
    current: Tracked,
    power: Tracked,
    energy_sum: f64,
    sample_count: u32,
    first_timestamp_ms: Option<u64>,
    last_timestamp_ms: Option<u64>,
}

impl AggregationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(&mut self, sample: &Sample) {
        if self.sample_count == 0 {
            self.first_timestamp_ms = Some(sample.timestamp_ms);
        }
        self.last_timestamp_ms = Some(sample.timestamp_ms);

        let r = &sample.reading;
        self.voltage.push(r.voltage);
        self.current.push(r.current);
        self.power.push(r.active_power);
        self.energy_sum += r.active_energy;
        self.sample_count += 1;
    }

    /// `None` while the window is empty.
    pub fn mean(&self, quantity: Quantity) -> Option<f64> {
        if self.sample_count == 0 {
            return None;
        }
        let sum = match quantity {
            Quantity::Voltage => self.voltage.sum,
            Quantity::Current => self.current.sum,
            Quantity::Power => self.power.sum,
            Quantity::Energy => self.energy_sum,
        };
        Some(sum / f64::from(self.sample_count))
    }

    /// Energy has no bounds tracking.
    pub fn bounds(&self, quantity: Quantity) -> Option<Bounds> {
        match quantity {
            Quantity::Voltage => self.voltage.bounds,
            Quantity::Current => self.current.bounds,
            Quantity::Power => self.power.bounds,
            Quantity::Energy => None,
        }
    }

    pub fn energy_sum(&self) -> f64 {
        self.energy_sum
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn first_timestamp_ms(&self) -> Option<u64> {
        self.first_timestamp_ms
    }

    pub fn last_timestamp_ms(&self) -> Option<u64> {
        self.last_timestamp_ms
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
