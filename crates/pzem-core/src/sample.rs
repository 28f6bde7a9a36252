use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One decoded reading from the meter, before it is stamped with a capture time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub address: u8,
    pub voltage: f64,
    pub current: f64,
    pub active_power: f64,
    pub active_energy: f64,
    pub frequency: f64,
    pub power_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the monitor started.
    #[serde(rename = "time")]
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub reading: Reading,
}

impl Sample {
    pub fn new(reading: Reading, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            reading,
        }
    }
}

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("timeout waiting for meter reply")]
    Timeout,
    #[error("checksum mismatch: expected {expected:#06X}, got {actual:#06X}")]
    Checksum { expected: u16, actual: u16 },
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("meter disconnected")]
    Disconnected,
}

#[async_trait]
pub trait SampleSource: Send {
    /// Performs one bounded-time transaction with the meter.
    async fn read(&mut self) -> Result<Reading, SampleError>;
    fn address(&self) -> u8;
}
