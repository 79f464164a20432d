//! Simulated docking station for the gas sequencing core.
//!
//! This crate provides a [`SimulatedInstrument`] that implements
//! [`dock_core::InstrumentController`] without any hardware. All timing uses
//! `tokio::time`, so tests can run it on a paused clock.
//!
//! # What can be simulated
//!
//! - Sensor readings from a [`ReadingProfile`] reacting to the open cylinder
//! - Cylinders running dry and pinched pump tubing ([`PortBehavior`])
//! - The instrument being lifted out of the cradle ([`DockScenario`])
//! - Instrument-side zeroing and span calibration ([`CalibrationBehavior`])
//! - Injected communication failures ([`FaultScenario`])
//!
//! ```rust,ignore
//! use dock_driver_mock::{ReadingProfile, SimSensor, SimulatedInstrument};
//!
//! let sim = SimulatedInstrument::builder()
//!     .sensor(SimSensor::new(1).profile(ReadingProfile::constant(60.0)))
//!     .build();
//! ```

pub mod config;
mod instrument;
mod profile;
mod scenario;

pub use config::{SimulatedInstrumentConfig, SimulatedPortConfig, SimulatedSensorConfig};
pub use instrument::{ControllerEvent, SimSensor, SimulatedInstrument, SimulatedInstrumentBuilder};
pub use profile::{ReadingProfile, TimelinePoint};
pub use scenario::{CalibrationBehavior, DockScenario, FaultScenario, PortBehavior};
