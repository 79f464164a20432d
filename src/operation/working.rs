//! Per-sensor working records owned by an operation.

use crate::gas_selection::GasTarget;
use dock_core::{
    BumpCriterion, GasEndPoint, GasUsage, InstalledSensor, PreconditionSettings,
    SensorGasResponse, SensorStatus,
};
use std::fmt;
use std::time::Duration;

/// Where a sensor stands in the pass plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassAssignment {
    #[default]
    Unassigned,
    /// Exposed in this pass (numbered from 1).
    Pass(usize),
    NotBumpEnabled,
    SkippedBySchedule,
    FailedZero,
    Expired,
    CalGasUnavailable,
}

impl PassAssignment {
    pub fn pass(self) -> Option<usize> {
        match self {
            PassAssignment::Pass(pass) => Some(pass),
            _ => None,
        }
    }

    /// Excluded from gas selection for the rest of the operation.
    pub fn is_excluded(self) -> bool {
        !matches!(self, PassAssignment::Unassigned | PassAssignment::Pass(_))
    }
}

/// Progress of a sensor through the exposure loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestState {
    #[default]
    Idle,
    Testing,
    Passed,
    /// Finished with a failing instrument verdict.
    Failed,
    FailedTimedOut,
    FailedPumpClosed,
}

impl TestState {
    /// Outcome kept across a flow-failure retry.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TestState::Passed | TestState::Failed | TestState::FailedTimedOut
        )
    }
}

/// Why preconditioning failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionFailure {
    TooManyOddReadings,
    TimedOut,
    PumpClosed,
}

impl fmt::Display for PreconditionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            PreconditionFailure::TooManyOddReadings => "too many odd readings",
            PreconditionFailure::TimedOut => "timed out",
            PreconditionFailure::PumpClosed => "pump closed",
        };
        write!(f, "{}", reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreconditionState {
    #[default]
    NotDone,
    Preconditioning,
    Passed,
    Failed(PreconditionFailure),
    Skipped,
}

#[derive(Debug, Clone, Default)]
pub struct PreconditionWork {
    pub state: PreconditionState,
    /// `None` when the instrument has preconditioning disabled.
    pub settings: Option<PreconditionSettings>,
    pub total_readings: u32,
    pub odd_readings: u32,
    pub good_readings: u32,
}

impl PreconditionWork {
    pub fn new(settings: Option<PreconditionSettings>) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn pause(&self) -> Duration {
        self.settings.map(|s| s.pause).unwrap_or_default()
    }
}

/// Working record of one sensor for the lifetime of an operation.
#[derive(Debug, Clone)]
pub struct SensorWork {
    pub sensor: InstalledSensor,
    pub target: GasTarget,
    pub max_reading: f64,
    pub flow_rate: u32,
    pub timeout: Duration,
    pub assignment: PassAssignment,
    pub state: TestState,
    pub consecutive_passes: u32,
    pub precondition: PreconditionWork,
    /// Concentration of the assigned cylinder, in the sensor's unit.
    pub applied_concentration: f64,
    /// O2 content of the assigned cylinder, in %VOL.
    pub applied_o2_vol: Option<f64>,
    pub response: SensorGasResponse,
}

impl SensorWork {
    pub fn new(sensor: InstalledSensor, target: GasTarget) -> Self {
        let response = SensorGasResponse::new(sensor.position, sensor.serial.clone(), sensor.gas);
        Self {
            target,
            max_reading: f64::MAX,
            flow_rate: 0,
            timeout: Duration::ZERO,
            assignment: PassAssignment::Unassigned,
            state: TestState::Idle,
            consecutive_passes: 0,
            precondition: PreconditionWork::default(),
            applied_concentration: target.concentration,
            applied_o2_vol: None,
            response,
            sensor,
        }
    }

    pub fn position(&self) -> u8 {
        self.sensor.position
    }

    /// Excludes the sensor with a final status.
    pub fn exclude(&mut self, assignment: PassAssignment, status: SensorStatus) {
        self.assignment = assignment;
        self.response.status = status;
    }

    /// Binds the sensor to `end_point` in `pass`.
    pub fn assign(&mut self, pass: usize, end_point: &GasEndPoint) {
        let cylinder = &end_point.cylinder;
        self.assignment = PassAssignment::Pass(pass);
        self.applied_concentration = cylinder
            .concentration_of(self.sensor.gas)
            .and_then(|ppm| self.sensor.unit.from_ppm(ppm, self.sensor.gas))
            .unwrap_or(self.target.concentration);
        self.applied_o2_vol = cylinder.o2_vol_percent();
        self.response.gas_concentration = self.applied_concentration;
    }

    /// Ready for another selection round.
    pub fn unassign(&mut self) {
        self.assignment = PassAssignment::Unassigned;
        self.state = TestState::Idle;
        self.consecutive_passes = 0;
        self.precondition.state = PreconditionState::NotDone;
    }

    pub fn in_pass(&self, pass: usize) -> bool {
        self.assignment.pass() == Some(pass)
    }

    /// Needs an end point in the next selection round.
    pub fn needs_gas(&self) -> bool {
        !self.assignment.is_excluded() && !self.state.is_settled()
    }

    /// Percentage of the applied concentration the reading reached.
    pub fn span_reserve(&self, reading: f64) -> f64 {
        if self.applied_concentration == 0.0 {
            return 0.0;
        }
        reading / self.applied_concentration * 100.0
    }

    /// Ledger usage for a bump exposure on `end_point`.
    pub fn bump_usage(&self, end_point: &GasEndPoint) -> GasUsage {
        if self.sensor.is_o2() && end_point.cylinder.is_reference_air() {
            GasUsage::BumpHigh
        } else {
            GasUsage::Bump
        }
    }

    pub fn ppm_limit(&self) -> Option<f64> {
        match self.sensor.bump_criterion {
            BumpCriterion::PpmLimit(limit) => Some(limit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dock_core::{Cylinder, GasCode, GasConcentration, MeasurementUnit, SensorCode};

    fn lel_sensor() -> SensorWork {
        let sensor = InstalledSensor::new(3, SensorCode::LEL, GasCode::Methane, MeasurementUnit::Lel, 50.0);
        let target = GasTarget::calibration(&sensor);
        SensorWork::new(sensor, target)
    }

    #[test]
    fn assign_converts_cylinder_to_sensor_unit() {
        let mut work = lel_sensor();
        let end_point = GasEndPoint::new(
            2,
            Cylinder::calibration_gas(
                "CH4",
                vec![GasConcentration::new(GasCode::Methane, 29_000.0)],
            ),
        );
        work.assign(1, &end_point);
        assert_eq!(work.assignment, PassAssignment::Pass(1));
        assert_eq!(work.applied_concentration, 58.0);
        assert_eq!(work.response.gas_concentration, 58.0);
        assert_eq!(work.span_reserve(29.0), 50.0);
    }

    #[test]
    fn settled_sensors_do_not_need_gas() {
        let mut work = lel_sensor();
        assert!(work.needs_gas());
        work.state = TestState::Passed;
        assert!(!work.needs_gas());
        work.state = TestState::FailedPumpClosed;
        assert!(work.needs_gas());
        work.exclude(PassAssignment::Expired, SensorStatus::GasExpired);
        assert!(!work.needs_gas());
    }

    #[test]
    fn precondition_failure_reasons() {
        assert_eq!(
            PreconditionFailure::TooManyOddReadings.to_string(),
            "too many odd readings"
        );
        assert_eq!(PreconditionFailure::PumpClosed.to_string(), "pump closed");
    }
}
