//! Error types for the docking station.
//!
//! Two layers:
//!
//! - [`ControllerError`] is what the hardware seam reports: a failed or
//!   garbled exchange with the docked instrument or the station's own
//!   valves and pump.
//! - [`OperationError`] is what a bump test or calibration reports to its
//!   caller. The known domain failures (gas unavailable, flow failed,
//!   instrument removed, sensor error mode, system alarm) are distinct
//!   variants so callers can react to them; anything else is wrapped into
//!   [`OperationError::FailedBumpTest`] or
//!   [`OperationError::FailedCalibration`] with the original kept as the
//!   error source.
//!
//! Only one kind is recovered from locally: a [`OperationError::FlowFailed`]
//! caused by an empty cylinder restarts gas selection without that cylinder.
//! A flow failure caused by bad pump tubing is never retried.

use crate::cylinder::EndPointKey;
use crate::gas::GasCode;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Controller Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerErrorKind {
    Communication,
    Timeout,
    InvalidResponse,
    Hardware,
    Unsupported,
}

impl std::fmt::Display for ControllerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ControllerErrorKind::Communication => "communication",
            ControllerErrorKind::Timeout => "timeout",
            ControllerErrorKind::InvalidResponse => "invalid_response",
            ControllerErrorKind::Hardware => "hardware",
            ControllerErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}", label)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Instrument controller {kind} error: {message}")]
pub struct ControllerError {
    pub kind: ControllerErrorKind,
    pub message: String,
}

impl ControllerError {
    pub fn new(kind: ControllerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::new(ControllerErrorKind::Communication, message)
    }

    pub fn hardware(message: impl Into<String>) -> Self {
        Self::new(ControllerErrorKind::Hardware, message)
    }
}

/// Convenience alias for controller calls.
pub type ControllerResult<T> = std::result::Result<T, ControllerError>;

// =============================================================================
// Operation Errors
// =============================================================================

/// Why the pump stopped delivering gas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFailure {
    pub end_point: EndPointKey,
    /// Tubing fault: not recoverable by switching cylinders.
    pub bad_pump_tubing: bool,
}

/// Convenience alias for results of gas operations.
pub type OperationResult<T> = std::result::Result<T, OperationError>;

/// Error reported by a bump test or calibration.
#[derive(Error, Debug)]
pub enum OperationError {
    /// No candidate cylinder satisfies the sensor's gas requirement.
    #[error("Correct gas unavailable for sensor {position}: {gas} at {concentration}")]
    CorrectGasUnavailable {
        position: u8,
        gas: GasCode,
        concentration: f64,
    },

    /// The pump stopped delivering gas from an end point.
    #[error("Gas flow failed on {end_point}{}", tubing_suffix(.bad_pump_tubing))]
    FlowFailed {
        end_point: EndPointKey,
        bad_pump_tubing: bool,
    },

    /// The instrument was removed from the cradle.
    #[error("Instrument is no longer docked")]
    InstrumentNotDocked,

    /// Sensors reported an error mode before any gas was applied.
    #[error("Sensors in error mode at positions {positions:?}")]
    SensorErrorMode { positions: Vec<u8> },

    /// The instrument reported a system alarm.
    #[error("Instrument is in system alarm")]
    SystemAlarm,

    /// Sensors never reached a biased state.
    #[error("Sensors not biased after waiting {waited:?}")]
    SensorsNotBiased { waited: Duration },

    /// The hardware seam failed.
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Semantically invalid input or settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected failure during a bump test.
    #[error("Bump test failed: {source}")]
    FailedBumpTest {
        #[source]
        source: Box<OperationError>,
    },

    /// Unexpected failure during a calibration.
    #[error("Calibration failed: {source}")]
    FailedCalibration {
        #[source]
        source: Box<OperationError>,
    },
}

fn tubing_suffix(bad_pump_tubing: &bool) -> &'static str {
    if *bad_pump_tubing {
        " (bad pump tubing)"
    } else {
        ""
    }
}

impl OperationError {
    pub fn flow_failed(failure: FlowFailure) -> Self {
        OperationError::FlowFailed {
            end_point: failure.end_point,
            bad_pump_tubing: failure.bad_pump_tubing,
        }
    }

    /// Known domain failures pass through operations unchanged.
    pub fn is_domain_failure(&self) -> bool {
        matches!(
            self,
            OperationError::CorrectGasUnavailable { .. }
                | OperationError::FlowFailed { .. }
                | OperationError::InstrumentNotDocked
                | OperationError::SensorErrorMode { .. }
                | OperationError::SystemAlarm
                | OperationError::FailedBumpTest { .. }
                | OperationError::FailedCalibration { .. }
        )
    }

    /// Wraps non-domain failures into [`OperationError::FailedBumpTest`].
    pub fn into_bump_failure(self) -> Self {
        if self.is_domain_failure() {
            self
        } else {
            OperationError::FailedBumpTest {
                source: Box::new(self),
            }
        }
    }

    /// Wraps non-domain failures into [`OperationError::FailedCalibration`].
    pub fn into_calibration_failure(self) -> Self {
        if self.is_domain_failure() {
            self
        } else {
            OperationError::FailedCalibration {
                source: Box::new(self),
            }
        }
    }

    pub fn as_flow_failure(&self) -> Option<FlowFailure> {
        match self {
            OperationError::FlowFailed {
                end_point,
                bad_pump_tubing,
            } => Some(FlowFailure {
                end_point: end_point.clone(),
                bad_pump_tubing: *bad_pump_tubing,
            }),
            _ => None,
        }
    }
}
