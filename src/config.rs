//! Station configuration loaded with Figment.
//!
//! Sources, later ones winning:
//! 1. the station TOML file
//! 2. environment variables prefixed `DOCKSTATION_`, nested with `__`
//!    (`DOCKSTATION_BUMP__THRESHOLD_PERCENT=60`)
//!
//! ```toml
//! [station]
//! serial = "DS2-0042"
//! log_level = "info"
//!
//! [timing]
//! exposure_poll = "2s"
//! final_purge = "30s"
//!
//! [bump]
//! threshold_percent = 50.0
//!
//! [[end_points]]
//! position = 1
//! cylinder = { factory_id = "FRESH_AIR", is_fresh_air = true }
//! ```

use crate::logging::{parse_log_level, OutputFormat};
use crate::operation::{BumpSettings, CalibrationSettings};
use dock_core::{Cylinder, GasEndPoint, TimingConfig};
use dock_driver_mock::SimulatedInstrumentConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Errors raised while loading the station file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] figment::Error),

    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Top-level station configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub station: StationSection,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub bump: BumpSettings,
    #[serde(default)]
    pub calibration: CalibrationSettings,
    /// Cylinder catalog, in the order selection scans it.
    #[serde(default)]
    pub end_points: Vec<GasEndPoint>,
    /// Simulated instrument for the CLI.
    #[serde(default)]
    pub simulation: Option<SimulatedInstrumentConfig>,
}

/// The `[station]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationSection {
    pub serial: String,
    /// trace, debug, info, warn or error
    pub log_level: String,
    pub log_format: OutputFormat,
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            serial: "DS-UNSET".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

impl StationConfig {
    /// Loads and validates the station file at `path`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        debug!("Loading station config from: {}", path.display());

        let config: StationConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DOCKSTATION_").split("__"))
            .extract()?;
        config.validate()?;

        info!(
            station = %config.station.serial,
            end_points = config.end_points.len(),
            "Loaded station config"
        );
        Ok(config)
    }

    /// Rejects settings that parse but cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_log_level(&self.station.log_level).map_err(ConfigError::Validation)?;

        if let Some(threshold) = self.bump.threshold_percent {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(ConfigError::Validation(format!(
                    "Invalid bump threshold_percent {}. Must be 0-100",
                    threshold
                )));
            }
        }
        if self.bump.min_consecutive_readings == 0 {
            return Err(ConfigError::Validation(
                "bump min_consecutive_readings must be at least 1".to_string(),
            ));
        }

        let polls = [
            ("exposure_poll", self.timing.exposure_poll),
            ("precondition_poll", self.timing.precondition_poll),
            ("bias_poll", self.timing.bias_poll),
        ];
        for (name, interval) in polls {
            if interval.is_zero() {
                return Err(ConfigError::Validation(format!(
                    "timing {} must be greater than zero",
                    name
                )));
            }
        }

        let mut positions = HashSet::new();
        for end_point in &self.end_points {
            if !positions.insert(end_point.position) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate end point position: {}",
                    end_point.position
                )));
            }
        }
        Ok(())
    }

    /// Cylinder catalog handed to an operation. Reference-air cylinders
    /// declared without gases get the ambient composition.
    pub fn catalog(&self) -> Vec<GasEndPoint> {
        self.end_points
            .iter()
            .cloned()
            .map(|mut end_point| {
                let cylinder = &mut end_point.cylinder;
                if cylinder.gases.is_empty() {
                    if cylinder.is_fresh_air {
                        cylinder.gases = Cylinder::fresh_air().gases;
                    } else if cylinder.is_zero_air {
                        cylinder.gases = Cylinder::zero_air(cylinder.factory_id.clone()).gases;
                    }
                }
                end_point
            })
            .collect()
    }
}
