//! Configuration for a simulated docked instrument.
//!
//! Deserialized from the `[simulation]` table of the station file. Each
//! sensor entry carries the instrument-side sensor definition plus how the
//! simulated sensor behaves.
//!
//! ```toml
//! [simulation]
//! serial = "SIM-0001"
//! biased_after = "3s"
//!
//! [[simulation.sensors]]
//! position = 1
//! serial = "CO-1"
//! sensor_code = "S0001"
//! gas = "G0001"
//! cal_gas_concentration = 100.0
//! profile = { type = "responsive", gas = "G0001", baseline = 0.0, exposed = 95.0, delay = "4s" }
//!
//! [[simulation.ports]]
//! position = 2
//! behavior = { type = "empties_after", after = "10s" }
//! ```

use crate::instrument::{SimSensor, SimulatedInstrument};
use crate::profile::ReadingProfile;
use crate::scenario::{CalibrationBehavior, DockScenario, PortBehavior};
use dock_core::{DockedInstrument, InstalledSensor, PreconditionSettings};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One simulated sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSensorConfig {
    #[serde(flatten)]
    pub sensor: InstalledSensor,
    pub profile: ReadingProfile,
    #[serde(default)]
    pub max_reading: Option<f64>,
    #[serde(default)]
    pub bump_flow_rate: Option<u32>,
    #[serde(default)]
    pub calibration_flow_rate: Option<u32>,
    #[serde(with = "humantime_serde", default)]
    pub bump_timeout: Option<Duration>,
    #[serde(with = "humantime_serde", default)]
    pub calibration_timeout: Option<Duration>,
    #[serde(default)]
    pub precondition: Option<PreconditionSettings>,
    #[serde(default)]
    pub error_mode: bool,
    #[serde(default)]
    pub calibration: Option<CalibrationBehavior>,
}

impl SimulatedSensorConfig {
    fn to_sim_sensor(&self) -> SimSensor {
        let mut sim = SimSensor::new(self.sensor.position)
            .profile(self.profile.clone())
            .error_mode(self.error_mode);
        if let Some(max_reading) = self.max_reading {
            sim = sim.max_reading(max_reading);
        }
        if let Some(flow_rate) = self.bump_flow_rate {
            sim = sim.bump_flow_rate(flow_rate);
        }
        if let Some(flow_rate) = self.calibration_flow_rate {
            sim.calibration_flow_rate = flow_rate;
        }
        if let Some(timeout) = self.bump_timeout {
            sim = sim.bump_timeout(timeout);
        }
        if let Some(timeout) = self.calibration_timeout {
            sim = sim.calibration_timeout(timeout);
        }
        if let Some(settings) = self.precondition {
            sim = sim.precondition(settings);
        }
        if let Some(behavior) = self.calibration {
            sim = sim.calibration(behavior);
        }
        sim
    }
}

/// Behavior of one station port.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPortConfig {
    pub position: u8,
    pub behavior: PortBehavior,
}

/// The `[simulation]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedInstrumentConfig {
    pub serial: String,
    #[serde(default)]
    pub sensors: Vec<SimulatedSensorConfig>,
    #[serde(default)]
    pub ports: Vec<SimulatedPortConfig>,
    #[serde(default)]
    pub dock: DockScenario,
    #[serde(with = "humantime_serde", default)]
    pub biased_after: Duration,
    #[serde(default)]
    pub system_alarm: bool,
}

impl SimulatedInstrumentConfig {
    /// Builds the instrument definition the operation sees and the simulator
    /// that answers for it.
    pub fn build(&self) -> (DockedInstrument, SimulatedInstrument) {
        let instrument = DockedInstrument::new(
            self.serial.clone(),
            self.sensors.iter().map(|s| s.sensor.clone()).collect(),
        );
        let mut builder = SimulatedInstrument::builder()
            .dock(self.dock)
            .biased_after(self.biased_after)
            .system_alarm(self.system_alarm);
        for sensor in &self.sensors {
            builder = builder.sensor(sensor.to_sim_sensor());
        }
        for port in &self.ports {
            builder = builder.port(port.position, port.behavior);
        }
        (instrument, builder.build())
    }
}
