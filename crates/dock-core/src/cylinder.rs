//! Cylinders and the gas end points they are attached to.
//!
//! A [`GasEndPoint`] is a physical port on the docking station with the
//! cylinder currently installed on it. The station's configuration owns the
//! long-lived catalog; every operation works on its own clones so that
//! marking a cylinder [`PressureLevel::Empty`] mid-operation never leaks into
//! shared state. Persisting an emptied cylinder is left to a later settings
//! sync, which receives the keys through the operation result.

use crate::gas::{
    concentrations_match, ppm_to_lel, GasCode, O2_REFERENCE_VOL, PPM_PER_VOL_PERCENT,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pressure level reported by the cylinder's regulator switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    #[default]
    Full,
    Low,
    Empty,
}

/// One gas and its concentration inside a cylinder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasConcentration {
    pub gas: GasCode,
    /// Concentration in ppm.
    pub ppm: f64,
}

impl GasConcentration {
    pub fn new(gas: GasCode, ppm: f64) -> Self {
        Self { gas, ppm }
    }
}

/// A gas cylinder as known for the duration of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cylinder {
    pub factory_id: String,
    #[serde(default)]
    pub part_number: String,
    #[serde(default)]
    pub gases: Vec<GasConcentration>,
    #[serde(default)]
    pub is_fresh_air: bool,
    #[serde(default)]
    pub is_zero_air: bool,
    #[serde(default)]
    pub pressure: PressureLevel,
    /// Last day the cylinder may be used. `None` never expires (fresh air).
    #[serde(default)]
    pub expiration: Option<NaiveDate>,
    #[serde(default)]
    pub volume_ml: u32,
}

impl Cylinder {
    /// Ambient air drawn through the fresh-air port.
    pub fn fresh_air() -> Self {
        Self {
            factory_id: "FRESH_AIR".to_string(),
            part_number: "FRESH_AIR".to_string(),
            gases: vec![GasConcentration::new(
                GasCode::Oxygen,
                O2_REFERENCE_VOL * PPM_PER_VOL_PERCENT,
            )],
            is_fresh_air: true,
            is_zero_air: false,
            pressure: PressureLevel::Full,
            expiration: None,
            volume_ml: 0,
        }
    }

    /// Bottled zero-grade air.
    pub fn zero_air(factory_id: impl Into<String>) -> Self {
        Self {
            factory_id: factory_id.into(),
            part_number: "ZERO_AIR".to_string(),
            gases: vec![GasConcentration::new(
                GasCode::Oxygen,
                O2_REFERENCE_VOL * PPM_PER_VOL_PERCENT,
            )],
            is_fresh_air: false,
            is_zero_air: true,
            pressure: PressureLevel::Full,
            expiration: None,
            volume_ml: 0,
        }
    }

    /// A calibration gas cylinder with the given contents.
    pub fn calibration_gas(factory_id: impl Into<String>, gases: Vec<GasConcentration>) -> Self {
        Self {
            factory_id: factory_id.into(),
            part_number: String::new(),
            gases,
            is_fresh_air: false,
            is_zero_air: false,
            pressure: PressureLevel::Full,
            expiration: None,
            volume_ml: 0,
        }
    }

    pub fn with_part_number(mut self, part_number: impl Into<String>) -> Self {
        self.part_number = part_number.into();
        self
    }

    pub fn with_expiration(mut self, expiration: NaiveDate) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_pressure(mut self, pressure: PressureLevel) -> Self {
        self.pressure = pressure;
        self
    }

    /// Fresh air or zero air.
    pub fn is_reference_air(&self) -> bool {
        self.is_fresh_air || self.is_zero_air
    }

    pub fn is_empty(&self) -> bool {
        self.pressure == PressureLevel::Empty
    }

    /// `true` once `today` is past the expiration date.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration.is_some_and(|expiration| today > expiration)
    }

    /// Concentration of `gas` in ppm, if the cylinder contains it.
    pub fn concentration_of(&self, gas: GasCode) -> Option<f64> {
        self.gases.iter().find(|g| g.gas == gas).map(|g| g.ppm)
    }

    pub fn contains(&self, gas: GasCode) -> bool {
        self.concentration_of(gas).is_some()
    }

    /// `true` when the cylinder holds exactly `ppm` of `gas`.
    pub fn contains_exactly(&self, gas: GasCode, ppm: f64) -> bool {
        self.concentration_of(gas)
            .is_some_and(|c| concentrations_match(c, ppm))
    }

    /// %LEL of `gas` in this cylinder; zero if absent or not combustible.
    pub fn lel_percent(&self, gas: GasCode) -> f64 {
        self.concentration_of(gas)
            .map(|ppm| ppm_to_lel(ppm, gas))
            .unwrap_or(0.0)
    }

    /// O2 content in %VOL, if any.
    pub fn o2_vol_percent(&self) -> Option<f64> {
        self.concentration_of(GasCode::Oxygen)
            .map(|ppm| ppm / PPM_PER_VOL_PERCENT)
    }
}

/// How the cylinder is plumbed into the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallationType {
    #[default]
    Manual,
    Manifold,
    IGas,
}

/// Change recorded for the end point since the last settings sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    #[default]
    Unchanged,
    Installed,
    Uninstalled,
    PressureChanged,
}

/// Identity of an end point: the physical port plus the installed cylinder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndPointKey {
    pub position: u8,
    pub factory_id: String,
}

impl fmt::Display for EndPointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {} ({})", self.position, self.factory_id)
    }
}

/// A port on the station with its installed cylinder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasEndPoint {
    pub position: u8,
    pub cylinder: Cylinder,
    #[serde(default)]
    pub installation: InstallationType,
    #[serde(default)]
    pub change: ChangeType,
}

impl GasEndPoint {
    pub fn new(position: u8, cylinder: Cylinder) -> Self {
        Self {
            position,
            cylinder,
            installation: InstallationType::Manual,
            change: ChangeType::Unchanged,
        }
    }

    pub fn with_installation(mut self, installation: InstallationType) -> Self {
        self.installation = installation;
        self
    }

    pub fn key(&self) -> EndPointKey {
        EndPointKey {
            position: self.position,
            factory_id: self.cylinder.factory_id.clone(),
        }
    }

    /// Marks the cylinder empty for the rest of the operation.
    pub fn mark_empty(&mut self) {
        if self.cylinder.pressure != PressureLevel::Empty {
            self.cylinder.pressure = PressureLevel::Empty;
            self.change = ChangeType::PressureChanged;
        }
    }
}

impl fmt::Display for GasEndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {} ({}", self.position, self.cylinder.factory_id)?;
        if self.cylinder.is_fresh_air {
            write!(f, ", fresh air")?;
        } else if self.cylinder.is_zero_air {
            write!(f, ", zero air")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_gas() -> Cylinder {
        Cylinder::calibration_gas(
            "QUAD-1",
            vec![
                GasConcentration::new(GasCode::CarbonMonoxide, 100.0),
                GasConcentration::new(GasCode::HydrogenSulfide, 25.0),
                GasConcentration::new(GasCode::Methane, 25_000.0),
                GasConcentration::new(GasCode::Oxygen, 180_000.0),
            ],
        )
    }

    #[test]
    fn concentration_lookup() {
        let cylinder = quad_gas();
        assert_eq!(cylinder.concentration_of(GasCode::CarbonMonoxide), Some(100.0));
        assert!(cylinder.contains_exactly(GasCode::HydrogenSulfide, 25.0));
        assert!(!cylinder.contains(GasCode::Chlorine));
        assert!((cylinder.lel_percent(GasCode::Methane) - 50.0).abs() < 1e-9);
        assert_eq!(cylinder.o2_vol_percent(), Some(18.0));
    }

    #[test]
    fn expiration_is_inclusive_of_last_day() {
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let cylinder = quad_gas().with_expiration(expiry);
        assert!(!cylinder.is_expired(expiry));
        assert!(cylinder.is_expired(expiry.succ_opt().unwrap()));
        assert!(!Cylinder::fresh_air().is_expired(expiry));
    }

    #[test]
    fn mark_empty_records_pressure_change() {
        let mut end_point = GasEndPoint::new(2, quad_gas());
        end_point.mark_empty();
        assert!(end_point.cylinder.is_empty());
        assert_eq!(end_point.change, ChangeType::PressureChanged);
    }

    #[test]
    fn reference_air_constructors() {
        assert!(Cylinder::fresh_air().is_reference_air());
        assert!(Cylinder::zero_air("ZA-1").is_zero_air);
        assert_eq!(Cylinder::fresh_air().o2_vol_percent(), Some(20.9));
    }

    #[test]
    fn end_point_deserializes_from_toml() {
        let text = r#"
            position = 3
            installation = "manifold"

            [cylinder]
            factory_id = "CO-100"
            part_number = "1810-0001"
            expiration = "2027-01-31"
            gases = [{ gas = "G0001", ppm = 100.0 }]
        "#;
        let end_point: GasEndPoint = toml::from_str(text).unwrap();
        assert_eq!(end_point.position, 3);
        assert_eq!(end_point.installation, InstallationType::Manifold);
        assert_eq!(end_point.cylinder.pressure, PressureLevel::Full);
        assert!(end_point.cylinder.contains(GasCode::CarbonMonoxide));
    }
}
