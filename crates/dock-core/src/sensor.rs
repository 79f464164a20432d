//! Sensors installed in the docked instrument.

use crate::gas::{GasCode, MeasurementUnit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sensor type code as reported by the instrument (e.g. `S0020` for O2).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorCode(pub String);

impl SensorCode {
    pub const CO: &'static str = "S0001";
    pub const H2S: &'static str = "S0002";
    pub const O2: &'static str = "S0020";
    pub const LEL: &'static str = "S0021";
    pub const CO2: &'static str = "S0040";

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn o2() -> Self {
        Self::new(Self::O2)
    }

    pub fn is(&self, code: &str) -> bool {
        self.0 == code
    }
}

impl fmt::Display for SensorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a bump reading is judged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BumpCriterion {
    /// Reading must reach this percentage of the applied concentration.
    FullSpanValue(f64),
    /// Reading must reach this absolute ppm value. Used for sensors such as
    /// Cl2, ClO2 and HCl whose span-reserve math is not meaningful.
    PpmLimit(f64),
    /// Oxygen depletion windows keyed by the cylinder's O2 content.
    O2,
}

impl Default for BumpCriterion {
    fn default() -> Self {
        BumpCriterion::FullSpanValue(50.0)
    }
}

/// A sensor as configured in the docked instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledSensor {
    pub position: u8,
    pub serial: String,
    pub sensor_code: SensorCode,
    #[serde(default)]
    pub unit: MeasurementUnit,
    /// Calibration gas.
    pub gas: GasCode,
    /// Calibration gas concentration, in `unit`.
    pub cal_gas_concentration: f64,
    /// Concentration used for bump tests, in `unit`. Falls back to the
    /// calibration concentration.
    #[serde(default)]
    pub bump_gas_concentration: Option<f64>,
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub bump_enabled: bool,
    #[serde(default)]
    pub bump_criterion: BumpCriterion,
}

fn default_resolution() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl InstalledSensor {
    pub fn new(
        position: u8,
        sensor_code: impl Into<String>,
        gas: GasCode,
        unit: MeasurementUnit,
        cal_gas_concentration: f64,
    ) -> Self {
        let sensor_code = SensorCode::new(sensor_code);
        let bump_criterion = if gas == GasCode::Oxygen {
            BumpCriterion::O2
        } else {
            BumpCriterion::default()
        };
        Self {
            position,
            serial: format!("SN{:04}", position),
            sensor_code,
            unit,
            gas,
            cal_gas_concentration,
            bump_gas_concentration: None,
            resolution: default_resolution(),
            enabled: true,
            bump_enabled: true,
            bump_criterion,
        }
    }

    pub fn with_bump_concentration(mut self, concentration: f64) -> Self {
        self.bump_gas_concentration = Some(concentration);
        self
    }

    pub fn with_criterion(mut self, criterion: BumpCriterion) -> Self {
        self.bump_criterion = criterion;
        self
    }

    pub fn with_bump_enabled(mut self, enabled: bool) -> Self {
        self.bump_enabled = enabled;
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    pub fn is_o2(&self) -> bool {
        self.gas == GasCode::Oxygen
    }

    pub fn bump_target_concentration(&self) -> f64 {
        self.bump_gas_concentration
            .unwrap_or(self.cal_gas_concentration)
    }
}

/// Preconditioning parameters for one sensor as reported by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreconditionSettings {
    /// Flow rate in ml/min.
    pub flow_rate: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Time to hold gas off before the real exposure starts.
    #[serde(with = "humantime_serde", default)]
    pub pause: Duration,
}

/// The docked instrument and its installed sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockedInstrument {
    pub serial: String,
    #[serde(default)]
    pub sensors: Vec<InstalledSensor>,
}

impl DockedInstrument {
    pub fn new(serial: impl Into<String>, sensors: Vec<InstalledSensor>) -> Self {
        Self {
            serial: serial.into(),
            sensors,
        }
    }

    /// CO2-bearing instruments must be zeroed and purged with zero air.
    pub fn requires_zero_air(&self) -> bool {
        self.sensors
            .iter()
            .any(|s| s.enabled && s.gas == GasCode::CarbonDioxide)
    }

    pub fn sensor(&self, position: u8) -> Option<&InstalledSensor> {
        self.sensors.iter().find(|s| s.position == position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn o2_sensor_defaults_to_o2_criterion() {
        let sensor = InstalledSensor::new(1, SensorCode::O2, GasCode::Oxygen, MeasurementUnit::Vol, 20.9)
            .with_bump_concentration(18.0);
        assert!(sensor.is_o2());
        assert_eq!(sensor.bump_criterion, BumpCriterion::O2);
        assert_eq!(sensor.bump_target_concentration(), 18.0);
    }

    #[test]
    fn zero_air_required_for_co2() {
        let instrument = DockedInstrument::new(
            "INST-1",
            vec![InstalledSensor::new(
                1,
                SensorCode::CO2,
                GasCode::CarbonDioxide,
                MeasurementUnit::Vol,
                2.5,
            )],
        );
        assert!(instrument.requires_zero_air());
    }

    #[test]
    fn criterion_round_trips_through_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            criterion: BumpCriterion,
        }
        let wrapper: Wrapper =
            toml::from_str("criterion = { type = \"ppm_limit\", value = 0.5 }").unwrap();
        assert_eq!(wrapper.criterion, BumpCriterion::PpmLimit(0.5));
    }
}
