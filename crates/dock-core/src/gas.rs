//! Gas codes and concentration units.
//!
//! Cylinders always describe their contents in ppm. Sensors express their
//! target concentration in their own measurement unit (ppm, %LEL or %VOL), so
//! every comparison between the two goes through [`MeasurementUnit::to_ppm`].
//!
//! # LEL conversion
//!
//! A gas's LEL multiplier converts ppm into percent of its lower explosive
//! limit (`%LEL = ppm * multiplier`). Going the other way divides by the
//! multiplier, which produces values such as `24999.999999999996` for a
//! 50 %LEL methane target. The conversion therefore rounds twice: first to two
//! decimal places, then to the nearest hundred ppm.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference oxygen concentration of ambient (fresh or zero) air, in %VOL.
pub const O2_REFERENCE_VOL: f64 = 20.9;

/// Parts per million in one percent by volume.
pub const PPM_PER_VOL_PERCENT: f64 = 10_000.0;

const EPSILON: f64 = 1e-6;

/// Gases known to the docking station.
///
/// Serialized with the iNet style gas code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GasCode {
    #[serde(rename = "G0001")]
    CarbonMonoxide,
    #[serde(rename = "G0002")]
    HydrogenSulfide,
    #[serde(rename = "G0003")]
    SulfurDioxide,
    #[serde(rename = "G0004")]
    NitrogenDioxide,
    #[serde(rename = "G0005")]
    Chlorine,
    #[serde(rename = "G0006")]
    ChlorineDioxide,
    #[serde(rename = "G0007")]
    HydrogenCyanide,
    #[serde(rename = "G0008")]
    Phosphine,
    #[serde(rename = "G0009")]
    Hydrogen,
    #[serde(rename = "G0011")]
    NitricOxide,
    #[serde(rename = "G0012")]
    Ammonia,
    #[serde(rename = "G0013")]
    HydrogenChloride,
    #[serde(rename = "G0020")]
    Oxygen,
    #[serde(rename = "G0021")]
    Methane,
    #[serde(rename = "G0022")]
    Pentane,
    #[serde(rename = "G0023")]
    Hexane,
    #[serde(rename = "G0026")]
    Propane,
    #[serde(rename = "G0040")]
    CarbonDioxide,
}

impl GasCode {
    /// Multiplier converting ppm into %LEL. Zero for gases that are not
    /// combustible (or not measured on an LEL scale).
    pub fn lel_multiplier(self) -> f64 {
        match self {
            GasCode::Methane => 100.0 / 50_000.0,
            GasCode::Pentane => 100.0 / 14_000.0,
            GasCode::Hexane => 100.0 / 11_000.0,
            GasCode::Propane => 100.0 / 21_000.0,
            GasCode::Hydrogen => 100.0 / 40_000.0,
            _ => 0.0,
        }
    }

    pub fn is_combustible(self) -> bool {
        self.lel_multiplier() > 0.0
    }

    /// The iNet gas code string.
    pub fn code(self) -> &'static str {
        match self {
            GasCode::CarbonMonoxide => "G0001",
            GasCode::HydrogenSulfide => "G0002",
            GasCode::SulfurDioxide => "G0003",
            GasCode::NitrogenDioxide => "G0004",
            GasCode::Chlorine => "G0005",
            GasCode::ChlorineDioxide => "G0006",
            GasCode::HydrogenCyanide => "G0007",
            GasCode::Phosphine => "G0008",
            GasCode::Hydrogen => "G0009",
            GasCode::NitricOxide => "G0011",
            GasCode::Ammonia => "G0012",
            GasCode::HydrogenChloride => "G0013",
            GasCode::Oxygen => "G0020",
            GasCode::Methane => "G0021",
            GasCode::Pentane => "G0022",
            GasCode::Hexane => "G0023",
            GasCode::Propane => "G0026",
            GasCode::CarbonDioxide => "G0040",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            GasCode::CarbonMonoxide => "CO",
            GasCode::HydrogenSulfide => "H2S",
            GasCode::SulfurDioxide => "SO2",
            GasCode::NitrogenDioxide => "NO2",
            GasCode::Chlorine => "Cl2",
            GasCode::ChlorineDioxide => "ClO2",
            GasCode::HydrogenCyanide => "HCN",
            GasCode::Phosphine => "PH3",
            GasCode::Hydrogen => "H2",
            GasCode::NitricOxide => "NO",
            GasCode::Ammonia => "NH3",
            GasCode::HydrogenChloride => "HCl",
            GasCode::Oxygen => "O2",
            GasCode::Methane => "CH4",
            GasCode::Pentane => "C5H12",
            GasCode::Hexane => "C6H14",
            GasCode::Propane => "C3H8",
            GasCode::CarbonDioxide => "CO2",
        }
    }
}

impl fmt::Display for GasCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol(), self.code())
    }
}

/// Unit a sensor reports (and is calibrated) in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementUnit {
    #[default]
    Ppm,
    Lel,
    Vol,
}

impl MeasurementUnit {
    /// Converts a concentration expressed in this unit into ppm of `gas`.
    ///
    /// Returns `None` for an LEL value of a gas without an LEL multiplier.
    pub fn to_ppm(self, value: f64, gas: GasCode) -> Option<f64> {
        match self {
            MeasurementUnit::Ppm => Some(value),
            MeasurementUnit::Vol => Some(value * PPM_PER_VOL_PERCENT),
            MeasurementUnit::Lel => {
                let multiplier = gas.lel_multiplier();
                if multiplier <= 0.0 {
                    return None;
                }
                Some(lel_to_ppm(value, multiplier))
            }
        }
    }

    /// Converts a ppm concentration of `gas` into this unit.
    pub fn from_ppm(self, ppm: f64, gas: GasCode) -> Option<f64> {
        match self {
            MeasurementUnit::Ppm => Some(ppm),
            MeasurementUnit::Vol => Some(ppm / PPM_PER_VOL_PERCENT),
            MeasurementUnit::Lel => {
                let multiplier = gas.lel_multiplier();
                if multiplier <= 0.0 {
                    return None;
                }
                Some(round_to(ppm * multiplier, 2))
            }
        }
    }
}

impl fmt::Display for MeasurementUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MeasurementUnit::Ppm => "ppm",
            MeasurementUnit::Lel => "%LEL",
            MeasurementUnit::Vol => "%VOL",
        };
        write!(f, "{}", label)
    }
}

/// %LEL to ppm with the two-step rounding described in the module docs.
pub fn lel_to_ppm(lel: f64, multiplier: f64) -> f64 {
    let ppm = round_to(lel / multiplier, 2);
    (ppm / 100.0).round() * 100.0
}

/// ppm of a gas to %LEL. Zero when the gas is not combustible.
pub fn ppm_to_lel(ppm: f64, gas: GasCode) -> f64 {
    ppm * gas.lel_multiplier()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Concentration equality tolerant of representation noise.
pub fn concentrations_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// `true` when `vol` is the 20.9 %VOL oxygen reference.
pub fn is_o2_reference(vol: f64) -> bool {
    concentrations_match(vol, O2_REFERENCE_VOL)
}
