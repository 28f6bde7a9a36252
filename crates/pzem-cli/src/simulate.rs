use async_trait::async_trait;
use pzem_core::driver::Pzem004t;
use pzem_core::{Reading, SampleError, SampleSource};

/// Deterministic mains-like readings for running without a meter attached.
pub struct SimulatedMeter {
    address: u8,
    tick: u64,
    energy_wh: f64,
}

impl SimulatedMeter {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            tick: 0,
            energy_wh: 0.0,
        }
    }

    fn next_reading(&mut self) -> Reading {
        let t = self.tick as f64;
        self.tick += 1;

        let voltage = 230.0 + 1.5 * (t * 0.1).sin();
        let current = 0.45 + 0.1 * (t * 0.05).sin();
        let power_factor = 0.95;
        let active_power = voltage * current * power_factor;
        self.energy_wh += active_power / 3600.0;

        Reading {
            address: self.address,
            voltage: (voltage * 10.0).round() / 10.0,
            current: (current * 1000.0).round() / 1000.0,
            active_power: (active_power * 10.0).round() / 10.0,
            active_energy: self.energy_wh.floor(),
            frequency: 50.0,
            power_factor,
        }
    }
}

#[async_trait]
impl SampleSource for SimulatedMeter {
    async fn read(&mut self) -> Result<Reading, SampleError> {
        Ok(self.next_reading())
    }

    fn address(&self) -> u8 {
        self.address
    }
}

pub enum Source {
    Meter(Pzem004t),
    Simulated(SimulatedMeter),
}

#[async_trait]
impl SampleSource for Source {
    async fn read(&mut self) -> Result<Reading, SampleError> {
        match self {
            Source::Meter(meter) => meter.read().await,
            Source::Simulated(sim) => sim.read().await,
        }
    }

    fn address(&self) -> u8 {
        match self {
            Source::Meter(meter) => meter.address(),
            Source::Simulated(sim) => sim.address(),
        }
    }
}
