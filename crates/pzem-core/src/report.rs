use serde::Serialize;

use crate::sample::Sample;
use crate::stats::{AggregationWindow, Quantity};

/// Full per-window summary published on the report topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    #[serde(skip)]
    pub address: u8,
    pub device_address: String,
    pub timestamp: u64,
    pub link_signal_strength: Option<i32>,
    pub interval_minutes: u64,
    pub sample_count: u32,
    pub period_start: u64,
    pub period_end: u64,
    pub avg_voltage: f64,
    pub avg_current: f64,
    pub avg_power: f64,
    /// Mean energy reading over the window, kept under this name for consumers.
    pub total_energy: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub min_current: f64,
    pub max_current: f64,
    pub min_power: f64,
    pub max_power: f64,
    pub current_data: Option<Sample>,
}

/// Fallback record used when the full report does not fit the payload limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReducedReport {
    pub address: u8,
    pub timestamp: u64,
    pub interval_min: u64,
    pub samples: u32,
    pub avg_voltage: f64,
    pub avg_current: f64,
    pub avg_power: f64,
    pub energy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Announcement {
    pub status: String,
    pub device: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedReport {
    pub payload: Vec<u8>,
    pub reduced: bool,
}

pub struct ReportContext {
    pub address: u8,
    pub now_ms: u64,
    pub link_signal_strength: Option<i32>,
    pub interval_minutes: u64,
}

pub fn device_address_hex(address: u8) -> String {
    format!("{address:x}")
}

impl Report {
    /// Returns `None` for an empty window; min/max are never read from one.
    pub fn build(
        window: &AggregationWindow,
        last_sample: Option<&Sample>,
        ctx: &ReportContext,
    ) -> Option<Self> {
        let voltage = window.bounds(Quantity::Voltage)?;
        let current = window.bounds(Quantity::Current)?;
        let power = window.bounds(Quantity::Power)?;

        Some(Self {
            address: ctx.address,
            device_address: device_address_hex(ctx.address),
            timestamp: ctx.now_ms,
            link_signal_strength: ctx.link_signal_strength,
            interval_minutes: ctx.interval_minutes,
            sample_count: window.sample_count(),
            period_start: window.first_timestamp_ms()?,
            period_end: window.last_timestamp_ms()?,
            avg_voltage: window.mean(Quantity::Voltage)?,
            avg_current: window.mean(Quantity::Current)?,
            avg_power: window.mean(Quantity::Power)?,
            total_energy: window.mean(Quantity::Energy)?,
            min_voltage: voltage.min,
            max_voltage: voltage.max,
            min_current: current.min,
            max_current: current.max,
            min_power: power.min,
            max_power: power.max,
            current_data: last_sample.copied(),
        })
    }

    pub fn reduced(&self) -> ReducedReport {
        ReducedReport {
            address: self.address,
            timestamp: self.timestamp,
            interval_min: self.interval_minutes,
            samples: self.sample_count,
            avg_voltage: self.avg_voltage,
            avg_current: self.avg_current,
            avg_power: self.avg_power,
            energy: self.total_energy,
        }
    }

    /// Serializes the report, switching to the reduced record when the full
    /// payload is longer than `max_bytes`.
    pub fn encode(&self, max_bytes: usize) -> Result<EncodedReport, serde_json::Error> {
        let payload = serde_json::to_vec(self)?;
        if payload.len() <= max_bytes {
            return Ok(EncodedReport {
                payload,
                reduced: false,
            });
        }

        Ok(EncodedReport {
            payload: serde_json::to_vec(&self.reduced())?,
            reduced: true,
        })
    }
}

impl Announcement {
    pub fn connected(client_id: &str, address: u8) -> Self {
        Self {
            status: "connected".to_string(),
            device: client_id.to_string(),
            address: device_address_hex(address),
        }
    }
}
