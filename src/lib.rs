//! # Dockstation
//!
//! Gas sequencing for a gas-detection instrument docking station. Given the
//! cylinders installed on the station and an instrument sitting in the
//! cradle, the operations in this crate pick a cylinder for every sensor,
//! group the sensors into passes that share one pump, precondition and
//! expose each pass, recover from cylinders running dry, and return a
//! per-sensor result.
//!
//! ## Crate structure
//!
//! - **`gas_selection`**: which end point can serve a sensor's gas at its
//!   concentration, with the LEL and O2 safety ceilings.
//! - **`passes`**: groups sensors sharing an end point into ordered passes.
//! - **`operation`**: the bump test and calibration state machines, their
//!   preconditioning, exposure, purge and retry phases.
//! - **`config`**: the station file, loaded with Figment.
//! - **`logging`**: `tracing-subscriber` setup.
//!
//! The data model, errors and the hardware seam live in `dock-core`; the
//! simulated instrument used by tests and the CLI lives in
//! `dock-driver-mock`.

pub mod config;
pub mod gas_selection;
pub mod logging;
pub mod operation;
pub mod passes;

pub use config::{ConfigError, StationConfig};
pub use gas_selection::{GasSelector, GasTarget, TriedSet};
pub use operation::{
    BumpSettings, BumpTestOperation, CalibrationOperation, CalibrationSettings, OperationContext,
};
pub use passes::PassPlan;

/// Result of a bump test.
pub type BumpTestResult = dock_core::GasOperationResult;

/// Result of a calibration.
pub type CalibrationResult = dock_core::GasOperationResult;
