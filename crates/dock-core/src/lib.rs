//! Core types and traits for the gas docking station.
//!
//! - [`gas`] - gas codes, measurement units and LEL conversion
//! - [`cylinder`] - cylinders and the end points they are installed on
//! - [`sensor`] - sensors installed in the docked instrument
//! - [`response`] - per-sensor results and the gas usage ledger
//! - [`controller`] - the hardware and console seams
//! - [`timing`] - poll intervals and grace periods
//! - [`error`] - controller and operation errors

pub mod controller;
pub mod cylinder;
pub mod error;
pub mod gas;
pub mod response;
pub mod sensor;
pub mod timing;

pub use controller::{
    CalibrationVerdict, ConsoleReporter, ConsoleState, InstrumentController, NoopConsole,
    TracingConsole,
};
pub use cylinder::{
    ChangeType, Cylinder, EndPointKey, GasConcentration, GasEndPoint, InstallationType,
    PressureLevel,
};
pub use error::{
    ControllerError, ControllerErrorKind, ControllerResult, FlowFailure, OperationError,
    OperationResult,
};
pub use gas::{GasCode, MeasurementUnit};
pub use response::{
    GasOperationResult, GasUsage, OperationKind, SensorGasResponse, SensorStatus,
    UsedGasEndPoint,
};
pub use sensor::{BumpCriterion, DockedInstrument, InstalledSensor, PreconditionSettings, SensorCode};
pub use timing::TimingConfig;
