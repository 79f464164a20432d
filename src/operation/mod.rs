//! Bump test and calibration operations.
//!
//! An operation is one run of the gas sequencing state machine against the
//! docked instrument:
//!
//! ```text
//! checks -> sensors on -> bias wait -> [zero] -> select gas -> partition
//!   -> per pass: (cross-pass purge) -> precondition -> expose
//!   -> on flow failure: mark cylinder empty, select again
//!   -> final purge -> [O2 recovery] -> result
//! ```
//!
//! Everything the operation needs from the outside world comes in through
//! an [`OperationContext`]; everything it learns lives in its own
//! [`working::SensorWork`] records until the result is built.

pub mod bump;
pub mod calibration;
mod exposure;
mod o2;
mod precondition;
mod purge;
mod retry;
pub mod working;

pub use bump::BumpTestOperation;
pub use calibration::CalibrationOperation;

use crate::gas_selection::{GasSelector, TriedSet};
use chrono::{DateTime, NaiveDate, Utc};
use dock_core::{
    ConsoleReporter, ConsoleState, DockedInstrument, EndPointKey, GasEndPoint,
    GasOperationResult, InstrumentController, OperationError, OperationKind, OperationResult,
    SensorCode, SensorGasResponse, SensorStatus, TimingConfig, TracingConsole,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use working::{PassAssignment, SensorWork};

/// Bump test settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BumpSettings {
    /// Station-wide full-span threshold in percent. Overrides the threshold
    /// of every sensor judged by full-span value.
    pub threshold_percent: Option<f64>,
    /// Consecutive passing readings before a sensor is marked passed.
    pub min_consecutive_readings: u32,
    /// Sensor codes scheduled for this bump. Empty means every sensor.
    pub component_codes: Vec<SensorCode>,
}

impl Default for BumpSettings {
    fn default() -> Self {
        Self {
            threshold_percent: None,
            min_consecutive_readings: 1,
            component_codes: Vec::new(),
        }
    }
}

/// Calibration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Zero sensors before spanning them.
    pub zero_sensors: bool,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self { zero_sensors: true }
    }
}

/// Collaborators handed to an operation.
#[derive(Clone)]
pub struct OperationContext {
    pub controller: Arc<dyn InstrumentController>,
    pub console: Arc<dyn ConsoleReporter>,
    pub timing: TimingConfig,
    /// Date cylinder expirations are checked against.
    pub today: NaiveDate,
}

impl OperationContext {
    pub fn new(controller: Arc<dyn InstrumentController>) -> Self {
        Self {
            controller,
            console: Arc::new(TracingConsole),
            timing: TimingConfig::default(),
            today: Utc::now().date_naive(),
        }
    }

    pub fn with_console(mut self, console: Arc<dyn ConsoleReporter>) -> Self {
        self.console = console;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Fails with [`OperationError::InstrumentNotDocked`] once the instrument
    /// is out of the cradle.
    pub(crate) async fn ensure_docked(&self) -> OperationResult<()> {
        if self.controller.is_docked().await? {
            Ok(())
        } else {
            warn!("Instrument removed from the cradle");
            self.console.report(ConsoleState::InstrumentRemoved);
            Err(OperationError::InstrumentNotDocked)
        }
    }

    /// Valve position above zero is the proxy for gas flowing.
    pub(crate) async fn pump_flowing(&self) -> OperationResult<bool> {
        Ok(self.controller.pump_valve_position().await? > 0)
    }

    /// Sleeps for `duration` in poll-sized steps, checking the dock each step.
    pub(crate) async fn wait_docked(&self, duration: Duration) -> OperationResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            sleep((deadline - now).min(self.timing.exposure_poll)).await;
            self.ensure_docked().await?;
        }
    }
}

/// Everything an operation learns while it runs.
#[derive(Debug)]
pub(crate) struct OperationState {
    /// The operation's own copy of the station's end points.
    pub candidates: Vec<GasEndPoint>,
    pub sensors: Vec<SensorWork>,
    pub emptied: Vec<EndPointKey>,
    pub cumulative_response_time: Duration,
    /// End point of the last pass that ran, for cross-pass purges.
    pub last_pass_end_point: Option<EndPointKey>,
    /// Purge with zero air instead of fresh air.
    pub zero_air_purge: bool,
    pub started: DateTime<Utc>,
}

impl OperationState {
    pub fn new(candidates: Vec<GasEndPoint>, zero_air_purge: bool) -> Self {
        Self {
            candidates,
            sensors: Vec::new(),
            emptied: Vec::new(),
            cumulative_response_time: Duration::ZERO,
            last_pass_end_point: None,
            zero_air_purge,
            started: Utc::now(),
        }
    }

    /// Marks the end point empty in this operation's copy of the catalog.
    pub fn mark_empty(&mut self, key: &EndPointKey) {
        for end_point in self.candidates.iter_mut().filter(|ep| ep.key() == *key) {
            end_point.mark_empty();
        }
        if !self.emptied.contains(key) {
            self.emptied.push(key.clone());
        }
    }

    /// Reference air end point used for purging and zeroing.
    pub fn reference_air(&self) -> Option<GasEndPoint> {
        let usable = |ep: &&GasEndPoint| !ep.cylinder.is_empty();
        let zero_air = self
            .candidates
            .iter()
            .filter(usable)
            .find(|ep| ep.cylinder.is_zero_air);
        let fresh_air = self
            .candidates
            .iter()
            .filter(usable)
            .find(|ep| ep.cylinder.is_fresh_air);
        if self.zero_air_purge {
            zero_air.or(fresh_air).cloned()
        } else {
            fresh_air.cloned()
        }
    }

    /// Current responses with the cumulative response time stamped on.
    pub fn responses(&self) -> Vec<SensorGasResponse> {
        self.sensors
            .iter()
            .map(|work| {
                let mut response = work.response.clone();
                response.cumulative_response_time = self.cumulative_response_time;
                response
            })
            .collect()
    }

    pub fn finish(&self, kind: OperationKind, instrument_serial: &str) -> GasOperationResult {
        GasOperationResult {
            kind,
            instrument_serial: instrument_serial.to_string(),
            started: self.started,
            finished: Utc::now(),
            responses: self.responses(),
            cumulative_response_time: self.cumulative_response_time,
            emptied_end_points: self.emptied.clone(),
        }
    }
}

/// Excludes `work` up front when no installed cylinder can serve it.
pub(crate) fn screen_gas(ctx: &OperationContext, candidates: &[GasEndPoint], work: &mut SensorWork) {
    let selector = GasSelector::new(ctx.today);
    let mut tried = TriedSet::new();
    if selector.select(&work.target, candidates, &mut tried).is_ok() {
        return;
    }
    if selector.expired_only(&work.target, candidates) {
        warn!(position = work.position(), gas = %work.sensor.gas, "Gas expired");
        work.exclude(PassAssignment::Expired, SensorStatus::GasExpired);
    } else {
        warn!(position = work.position(), gas = %work.sensor.gas, "Gas unavailable");
        work.exclude(PassAssignment::CalGasUnavailable, SensorStatus::GasUnavailable);
    }
}

/// Checks that must pass before any gas flows, then brings the sensors up.
pub(crate) async fn prepare_instrument(
    ctx: &OperationContext,
    instrument: &DockedInstrument,
) -> OperationResult<()> {
    ctx.ensure_docked().await?;

    if ctx.controller.in_system_alarm().await? {
        return Err(OperationError::SystemAlarm);
    }

    let mut in_error = Vec::new();
    for sensor in instrument.sensors.iter().filter(|s| s.enabled) {
        if ctx.controller.sensor_in_error_mode(sensor.position).await? {
            in_error.push(sensor.position);
        }
    }
    if !in_error.is_empty() {
        return Err(OperationError::SensorErrorMode {
            positions: in_error,
        });
    }

    ctx.controller.turn_on_sensors().await?;
    wait_for_bias(ctx).await
}

async fn wait_for_bias(ctx: &OperationContext) -> OperationResult<()> {
    let start = Instant::now();
    loop {
        ctx.ensure_docked().await?;
        if ctx.controller.sensors_biased().await? {
            debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Sensors biased");
            return Ok(());
        }
        let waited = start.elapsed();
        if waited >= ctx.timing.bias_timeout {
            return Err(OperationError::SensorsNotBiased { waited });
        }
        info!(waited_secs = waited.as_secs(), "Waiting for sensors to bias");
        sleep(ctx.timing.bias_poll).await;
    }
}
