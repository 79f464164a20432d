//! Hardware and console seams consumed by gas operations.
//!
//! The operations never talk to the serial/Modbus driver directly. They are
//! handed an [`InstrumentController`] (the docked instrument plus the
//! station's valves and pump) and a [`ConsoleReporter`] (the operator
//! display). Production wires these to the real driver and console; tests
//! and the simulator wire them to `dock-driver-mock`.
//!
//! # Design
//!
//! - Async (uses `#[async_trait]`); every call is one blocking round-trip on
//!   the wire and is awaited before the next one is issued.
//! - Thread-safe (`Send + Sync`), shared as `Arc<dyn InstrumentController>`.
//! - Reports failures as [`ControllerError`].
//!
//! # Example
//!
//! ```rust,ignore
//! async fn flowing(controller: &dyn InstrumentController) -> ControllerResult<bool> {
//!     Ok(controller.pump_valve_position().await? > 0)
//! }
//! ```

use crate::cylinder::GasEndPoint;
use crate::error::ControllerResult;
use crate::sensor::PreconditionSettings;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Verdict of an instrument-side span calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationVerdict {
    pub passed: bool,
    /// Reading at the end of the calibration, in the sensor's unit.
    pub reading: f64,
}

/// Access to the docked instrument and the station's gas path.
#[async_trait]
pub trait InstrumentController: Send + Sync {
    // --- docking ----------------------------------------------------------

    /// `false` once the instrument has been lifted out of the cradle.
    async fn is_docked(&self) -> ControllerResult<bool>;

    // --- gas path ---------------------------------------------------------

    /// Opens the solenoid for `end_point` and runs the pump at `flow_rate`
    /// ml/min. Only one end point may be open at a time.
    async fn open_gas_end_point(&self, end_point: &GasEndPoint, flow_rate: u32)
        -> ControllerResult<()>;

    /// Closes `end_point` and stops the pump.
    async fn close_gas_end_point(&self, end_point: &GasEndPoint) -> ControllerResult<()>;

    /// Pump valve position; zero means the pump stopped delivering gas.
    async fn pump_valve_position(&self) -> ControllerResult<u8>;

    /// `true` when the pump fault is caused by the tubing, not the cylinder.
    async fn is_bad_pump_tubing(&self) -> ControllerResult<bool>;

    // --- sensor readings and settings -------------------------------------

    /// Current reading in the sensor's unit.
    async fn sensor_reading(&self, position: u8, resolution: f64) -> ControllerResult<f64>;

    /// Largest physically meaningful reading, in the sensor's unit.
    async fn sensor_max_reading(&self, position: u8, resolution: f64) -> ControllerResult<f64>;

    async fn sensor_bump_flow_rate(&self, position: u8) -> ControllerResult<u32>;

    async fn sensor_calibration_flow_rate(&self, position: u8) -> ControllerResult<u32>;

    async fn sensor_bump_timeout(&self, position: u8) -> ControllerResult<Duration>;

    async fn sensor_calibration_timeout(&self, position: u8) -> ControllerResult<Duration>;

    /// `None` when preconditioning is disabled for the sensor.
    async fn precondition_settings(
        &self,
        position: u8,
    ) -> ControllerResult<Option<PreconditionSettings>>;

    /// Tells the sensor to ignore (or resume responding to) gas flow.
    async fn set_sensor_gas_flow_paused(&self, position: u8, paused: bool)
        -> ControllerResult<()>;

    // --- instrument state -------------------------------------------------

    async fn turn_on_sensors(&self) -> ControllerResult<()>;

    /// `true` once every sensor has reached its bias voltage.
    async fn sensors_biased(&self) -> ControllerResult<bool>;

    async fn in_system_alarm(&self) -> ControllerResult<bool>;

    async fn sensor_in_error_mode(&self, position: u8) -> ControllerResult<bool>;

    // --- operation modes --------------------------------------------------

    async fn begin_bump(&self) -> ControllerResult<()>;

    async fn end_bump(&self) -> ControllerResult<()>;

    async fn begin_calibration(&self) -> ControllerResult<()>;

    async fn end_calibration(&self) -> ControllerResult<()>;

    /// Stores the bump verdict on the instrument.
    async fn record_bump_result(&self, position: u8, passed: bool) -> ControllerResult<()>;

    // --- calibration ------------------------------------------------------

    /// Concentration the instrument should span to, in the sensor's unit.
    async fn set_calibration_gas_concentration(
        &self,
        position: u8,
        concentration: f64,
    ) -> ControllerResult<()>;

    /// Zeroes the listed sensors on whatever gas is flowing; returns the
    /// positions that zeroed successfully.
    async fn zero_sensors(&self, positions: &[u8]) -> ControllerResult<Vec<u8>>;

    async fn begin_sensor_calibration(&self, positions: &[u8]) -> ControllerResult<()>;

    async fn is_sensor_calibrating(&self, position: u8) -> ControllerResult<bool>;

    async fn calibration_verdict(&self, position: u8) -> ControllerResult<CalibrationVerdict>;
}

/// Operator-visible station states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Bumping,
    Calibrating,
    Zeroing,
    Purging,
    /// Stopped: the operator must check the pump tubing.
    CheckPumpTubing,
    InstrumentRemoved,
}

impl std::fmt::Display for ConsoleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConsoleState::Bumping => "bumping",
            ConsoleState::Calibrating => "calibrating",
            ConsoleState::Zeroing => "zeroing",
            ConsoleState::Purging => "purging",
            ConsoleState::CheckPumpTubing => "stopped - check tubing",
            ConsoleState::InstrumentRemoved => "instrument removed",
        };
        write!(f, "{}", label)
    }
}

/// Receives console state transitions.
pub trait ConsoleReporter: Send + Sync {
    fn report(&self, state: ConsoleState);
}

/// Console reporter that writes transitions to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConsole;

impl ConsoleReporter for TracingConsole {
    fn report(&self, state: ConsoleState) {
        info!(console = %state, "Console state changed");
    }
}

/// Console reporter that discards transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConsole;

impl ConsoleReporter for NoopConsole {
    fn report(&self, _: ConsoleState) {}
}
