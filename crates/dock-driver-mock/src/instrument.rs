//! Simulated docked instrument and station gas path.
//!
//! Provides a deterministic stand-in for the real driver with:
//! - Per-sensor reading profiles driven by whatever cylinder is flowing
//! - Per-port pump behavior (empty cylinders, bad tubing)
//! - Undock scenarios and injected communication faults
//! - Instrument-side zeroing and span calibration
//! - An event log of every valve and mode change for assertions
//!
//! All time is measured with `tokio::time::Instant`, so tests running on a
//! paused clock see exactly the intervals the operation sleeps for.
//!
//! # Example
//!
//! ```rust,ignore
//! use dock_driver_mock::{SimulatedInstrument, SimSensor, ReadingProfile, PortBehavior};
//!
//! let sim = SimulatedInstrument::builder()
//!     .sensor(SimSensor::new(1).profile(ReadingProfile::constant(60.0)))
//!     .port(2, PortBehavior::EmptiesAfter { after: Duration::from_secs(10) })
//!     .build();
//! ```

use crate::profile::{ExposureView, ReadingProfile};
use crate::scenario::{CalibrationBehavior, DockScenario, FaultScenario, FaultState, PortBehavior};
use async_trait::async_trait;
use dock_core::{
    CalibrationVerdict, ControllerError, ControllerResult, GasEndPoint, InstrumentController,
    PreconditionSettings,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Pump valve position reported while gas is flowing.
const VALVE_OPEN_POSITION: u8 = 100;

/// A simulated sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSensor {
    pub position: u8,
    pub profile: ReadingProfile,
    #[serde(default = "default_max_reading")]
    pub max_reading: f64,
    #[serde(default = "default_flow_rate")]
    pub bump_flow_rate: u32,
    #[serde(default = "default_flow_rate")]
    pub calibration_flow_rate: u32,
    #[serde(with = "humantime_serde", default = "default_bump_timeout")]
    pub bump_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_calibration_timeout")]
    pub calibration_timeout: Duration,
    #[serde(default)]
    pub precondition: Option<PreconditionSettings>,
    #[serde(default)]
    pub error_mode: bool,
    #[serde(default = "default_true")]
    pub zeroes: bool,
    #[serde(default)]
    pub calibration: CalibrationBehavior,
}

fn default_max_reading() -> f64 {
    999.0
}

fn default_flow_rate() -> u32 {
    500
}

fn default_bump_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_calibration_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_true() -> bool {
    true
}

impl SimSensor {
    pub fn new(position: u8) -> Self {
        Self {
            position,
            profile: ReadingProfile::constant(0.0),
            max_reading: default_max_reading(),
            bump_flow_rate: default_flow_rate(),
            calibration_flow_rate: default_flow_rate(),
            bump_timeout: default_bump_timeout(),
            calibration_timeout: default_calibration_timeout(),
            precondition: None,
            error_mode: false,
            zeroes: true,
            calibration: CalibrationBehavior::default(),
        }
    }

    pub fn profile(mut self, profile: ReadingProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn max_reading(mut self, max_reading: f64) -> Self {
        self.max_reading = max_reading;
        self
    }

    pub fn bump_flow_rate(mut self, flow_rate: u32) -> Self {
        self.bump_flow_rate = flow_rate;
        self
    }

    pub fn bump_timeout(mut self, timeout: Duration) -> Self {
        self.bump_timeout = timeout;
        self
    }

    pub fn calibration_timeout(mut self, timeout: Duration) -> Self {
        self.calibration_timeout = timeout;
        self
    }

    pub fn precondition(mut self, settings: PreconditionSettings) -> Self {
        self.precondition = Some(settings);
        self
    }

    pub fn error_mode(mut self, error_mode: bool) -> Self {
        self.error_mode = error_mode;
        self
    }

    pub fn zeroes(mut self, zeroes: bool) -> Self {
        self.zeroes = zeroes;
        self
    }

    pub fn calibration(mut self, behavior: CalibrationBehavior) -> Self {
        self.calibration = behavior;
        self
    }
}

/// Everything the simulator did, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Opened { position: u8, flow_rate: u32 },
    Closed { position: u8 },
    GasFlowPaused { position: u8, paused: bool },
    SensorsOn,
    BeginBump,
    EndBump,
    BeginCalibration,
    EndCalibration,
    CalibrationGasSet { position: u8, concentration: f64 },
    Zeroed { positions: Vec<u8> },
    CalibrationStarted { positions: Vec<u8> },
    BumpRecorded { position: u8, passed: bool },
}

#[derive(Debug)]
struct OpenValve {
    end_point: GasEndPoint,
    opened_at: Instant,
}

#[derive(Debug, Default)]
struct SensorState {
    read_count: usize,
    was_exposed: bool,
    paused: bool,
    calibration_started: Option<Instant>,
    calibration_done: bool,
}

#[derive(Debug)]
struct SimState {
    sensors: BTreeMap<u8, SimSensor>,
    sensor_states: HashMap<u8, SensorState>,
    ports: HashMap<u8, PortBehavior>,
    dry_ports: HashSet<u8>,
    open: Option<OpenValve>,
    bad_tubing: bool,
    dock: DockScenario,
    started: Instant,
    sensors_on_at: Option<Instant>,
    biased_after: Duration,
    system_alarm: bool,
    faults: FaultState,
    events: Vec<ControllerEvent>,
}

impl SimState {
    fn since_open(&self, now: Instant) -> Option<Duration> {
        self.open.as_ref().map(|v| now.duration_since(v.opened_at))
    }

    fn flowing(&mut self, now: Instant) -> bool {
        let Some(open) = self.open.as_ref() else {
            return false;
        };
        let position = open.end_point.position;
        let since_open = now.duration_since(open.opened_at);
        if self.dry_ports.contains(&position) {
            return false;
        }
        match self.ports.get(&position).copied().unwrap_or_default() {
            PortBehavior::Normal => true,
            PortBehavior::EmptiesAfter { after } => {
                if since_open >= after {
                    debug!(position, "Simulated cylinder ran dry");
                    self.dry_ports.insert(position);
                    false
                } else {
                    true
                }
            }
            PortBehavior::BadTubingAfter { after } => {
                if since_open >= after {
                    self.bad_tubing = true;
                    false
                } else {
                    true
                }
            }
        }
    }

    fn sensor(&self, position: u8) -> ControllerResult<&SimSensor> {
        self.sensors
            .get(&position)
            .ok_or_else(|| ControllerError::hardware(format!("No sensor at position {}", position)))
    }

    fn reading(&mut self, position: u8, now: Instant) -> ControllerResult<f64> {
        let flowing = self.flowing(now);
        let since_open = self.since_open(now);
        let open_cylinder = if flowing {
            self.open.as_ref().map(|v| v.end_point.cylinder.clone())
        } else {
            None
        };
        let profile = self.sensor(position)?.profile.clone();
        let state = self.sensor_states.entry(position).or_default();
        let view = ExposureView {
            open_cylinder: if state.paused { None } else { open_cylinder.as_ref() },
            since_open: if flowing { since_open } else { None },
            read_index: state.read_count,
            was_exposed: state.was_exposed,
        };
        let value = profile.reading(&view);
        if profile.is_exposed(&view) {
            state.was_exposed = true;
        }
        state.read_count += 1;
        Ok(value)
    }
}

/// Simulated instrument implementing [`InstrumentController`].
pub struct SimulatedInstrument {
    state: Mutex<SimState>,
}

impl SimulatedInstrument {
    pub fn builder() -> SimulatedInstrumentBuilder {
        SimulatedInstrumentBuilder::default()
    }

    /// Snapshot of every event so far.
    pub fn events(&self) -> Vec<ControllerEvent> {
        self.state.lock().events.clone()
    }

    /// How many times the end point at `position` was opened.
    pub fn open_count(&self, position: u8) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, ControllerEvent::Opened { position: p, .. } if *p == position))
            .count()
    }

    /// Bump verdicts stored on the instrument, by position.
    pub fn bump_results(&self) -> BTreeMap<u8, bool> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::BumpRecorded { position, passed } => Some((*position, *passed)),
                _ => None,
            })
            .collect()
    }

    /// `true` when any end point is currently open.
    pub fn is_valve_open(&self) -> bool {
        self.state.lock().open.is_some()
    }

    /// Ports that ran dry during the simulation.
    pub fn dry_ports(&self) -> HashSet<u8> {
        self.state.lock().dry_ports.clone()
    }

    pub fn set_system_alarm(&self, alarm: bool) {
        self.state.lock().system_alarm = alarm;
    }

    fn check(&self, operation: &'static str) -> ControllerResult<()> {
        self.state.lock().faults.check(operation)
    }
}

#[async_trait]
impl InstrumentController for SimulatedInstrument {
    async fn is_docked(&self) -> ControllerResult<bool> {
        self.check("is_docked")?;
        let state = self.state.lock();
        Ok(match state.dock {
            DockScenario::AlwaysDocked => true,
            DockScenario::UndockAfter { after } => {
                Instant::now().duration_since(state.started) < after
            }
        })
    }

    async fn open_gas_end_point(
        &self,
        end_point: &GasEndPoint,
        flow_rate: u32,
    ) -> ControllerResult<()> {
        self.check("open_gas_end_point")?;
        let mut state = self.state.lock();
        if let Some(open) = &state.open {
            return Err(ControllerError::hardware(format!(
                "Cannot open port {}: port {} is still open",
                end_point.position, open.end_point.position
            )));
        }
        state.open = Some(OpenValve {
            end_point: end_point.clone(),
            opened_at: Instant::now(),
        });
        state.events.push(ControllerEvent::Opened {
            position: end_point.position,
            flow_rate,
        });
        Ok(())
    }

    async fn close_gas_end_point(&self, end_point: &GasEndPoint) -> ControllerResult<()> {
        self.check("close_gas_end_point")?;
        let mut state = self.state.lock();
        match state.open.take() {
            Some(open) if open.end_point.position == end_point.position => {
                state.events.push(ControllerEvent::Closed {
                    position: end_point.position,
                });
            }
            Some(open) => {
                warn!(
                    requested = end_point.position,
                    open = open.end_point.position,
                    "Close requested for a port that is not open"
                );
                state.open = Some(open);
            }
            None => {}
        }
        Ok(())
    }

    async fn pump_valve_position(&self) -> ControllerResult<u8> {
        self.check("pump_valve_position")?;
        let mut state = self.state.lock();
        Ok(if state.flowing(Instant::now()) {
            VALVE_OPEN_POSITION
        } else {
            0
        })
    }

    async fn is_bad_pump_tubing(&self) -> ControllerResult<bool> {
        self.check("is_bad_pump_tubing")?;
        Ok(self.state.lock().bad_tubing)
    }

    async fn sensor_reading(&self, position: u8, _resolution: f64) -> ControllerResult<f64> {
        self.check("sensor_reading")?;
        self.state.lock().reading(position, Instant::now())
    }

    async fn sensor_max_reading(&self, position: u8, _resolution: f64) -> ControllerResult<f64> {
        Ok(self.state.lock().sensor(position)?.max_reading)
    }

    async fn sensor_bump_flow_rate(&self, position: u8) -> ControllerResult<u32> {
        Ok(self.state.lock().sensor(position)?.bump_flow_rate)
    }

    async fn sensor_calibration_flow_rate(&self, position: u8) -> ControllerResult<u32> {
        Ok(self.state.lock().sensor(position)?.calibration_flow_rate)
    }

    async fn sensor_bump_timeout(&self, position: u8) -> ControllerResult<Duration> {
        Ok(self.state.lock().sensor(position)?.bump_timeout)
    }

    async fn sensor_calibration_timeout(&self, position: u8) -> ControllerResult<Duration> {
        Ok(self.state.lock().sensor(position)?.calibration_timeout)
    }

    async fn precondition_settings(
        &self,
        position: u8,
    ) -> ControllerResult<Option<PreconditionSettings>> {
        Ok(self.state.lock().sensor(position)?.precondition)
    }

    async fn set_sensor_gas_flow_paused(
        &self,
        position: u8,
        paused: bool,
    ) -> ControllerResult<()> {
        let mut state = self.state.lock();
        state.sensor_states.entry(position).or_default().paused = paused;
        state
            .events
            .push(ControllerEvent::GasFlowPaused { position, paused });
        Ok(())
    }

    async fn turn_on_sensors(&self) -> ControllerResult<()> {
        self.check("turn_on_sensors")?;
        let mut state = self.state.lock();
        if state.sensors_on_at.is_none() {
            state.sensors_on_at = Some(Instant::now());
        }
        state.events.push(ControllerEvent::SensorsOn);
        Ok(())
    }

    async fn sensors_biased(&self) -> ControllerResult<bool> {
        let state = self.state.lock();
        Ok(state
            .sensors_on_at
            .is_some_and(|on| Instant::now().duration_since(on) >= state.biased_after))
    }

    async fn in_system_alarm(&self) -> ControllerResult<bool> {
        Ok(self.state.lock().system_alarm)
    }

    async fn sensor_in_error_mode(&self, position: u8) -> ControllerResult<bool> {
        Ok(self.state.lock().sensor(position)?.error_mode)
    }

    async fn begin_bump(&self) -> ControllerResult<()> {
        self.state.lock().events.push(ControllerEvent::BeginBump);
        Ok(())
    }

    async fn end_bump(&self) -> ControllerResult<()> {
        self.state.lock().events.push(ControllerEvent::EndBump);
        Ok(())
    }

    async fn begin_calibration(&self) -> ControllerResult<()> {
        self.state
            .lock()
            .events
            .push(ControllerEvent::BeginCalibration);
        Ok(())
    }

    async fn end_calibration(&self) -> ControllerResult<()> {
        self.state.lock().events.push(ControllerEvent::EndCalibration);
        Ok(())
    }

    async fn record_bump_result(&self, position: u8, passed: bool) -> ControllerResult<()> {
        self.state
            .lock()
            .events
            .push(ControllerEvent::BumpRecorded { position, passed });
        Ok(())
    }

    async fn set_calibration_gas_concentration(
        &self,
        position: u8,
        concentration: f64,
    ) -> ControllerResult<()> {
        let mut state = self.state.lock();
        state.sensor(position)?;
        state.events.push(ControllerEvent::CalibrationGasSet {
            position,
            concentration,
        });
        Ok(())
    }

    async fn zero_sensors(&self, positions: &[u8]) -> ControllerResult<Vec<u8>> {
        self.check("zero_sensors")?;
        let mut state = self.state.lock();
        let flowing = state.flowing(Instant::now());
        let mut zeroed = Vec::new();
        for &position in positions {
            if flowing && state.sensor(position)?.zeroes {
                zeroed.push(position);
            }
        }
        state.events.push(ControllerEvent::Zeroed {
            positions: zeroed.clone(),
        });
        Ok(zeroed)
    }

    async fn begin_sensor_calibration(&self, positions: &[u8]) -> ControllerResult<()> {
        self.check("begin_sensor_calibration")?;
        let mut state = self.state.lock();
        let now = Instant::now();
        for &position in positions {
            state.sensor(position)?;
            let sensor_state = state.sensor_states.entry(position).or_default();
            sensor_state.calibration_started = Some(now);
            sensor_state.calibration_done = false;
            sensor_state.was_exposed = false;
        }
        state.events.push(ControllerEvent::CalibrationStarted {
            positions: positions.to_vec(),
        });
        Ok(())
    }

    async fn is_sensor_calibrating(&self, position: u8) -> ControllerResult<bool> {
        self.check("is_sensor_calibrating")?;
        let mut state = self.state.lock();
        let now = Instant::now();
        let duration = state.sensor(position)?.calibration.duration;
        let flowing = state.flowing(now);
        let opened_at = state.open.as_ref().map(|v| v.opened_at);
        let sensor_state = state.sensor_states.entry(position).or_default();
        let Some(started) = sensor_state.calibration_started else {
            return Ok(false);
        };
        if let (true, Some(opened_at)) = (flowing, opened_at) {
            let gas_on_since = started.max(opened_at);
            if now.duration_since(gas_on_since) >= duration {
                sensor_state.calibration_started = None;
                sensor_state.calibration_done = true;
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn calibration_verdict(&self, position: u8) -> ControllerResult<CalibrationVerdict> {
        let mut state = self.state.lock();
        let behavior = state.sensor(position)?.calibration;
        let done = state
            .sensor_states
            .get(&position)
            .is_some_and(|s| s.calibration_done);
        if !done {
            return Err(ControllerError::hardware(format!(
                "Sensor {} has no completed calibration",
                position
            )));
        }
        let reading = match behavior.reading {
            Some(reading) => reading,
            None => state.reading(position, Instant::now())?,
        };
        Ok(CalibrationVerdict {
            passed: behavior.passes,
            reading,
        })
    }
}

/// Builder for [`SimulatedInstrument`].
#[derive(Debug, Default)]
pub struct SimulatedInstrumentBuilder {
    sensors: Vec<SimSensor>,
    ports: HashMap<u8, PortBehavior>,
    dock: DockScenario,
    biased_after: Duration,
    system_alarm: bool,
    faults: Vec<FaultScenario>,
}

impl SimulatedInstrumentBuilder {
    pub fn sensor(mut self, sensor: SimSensor) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn port(mut self, position: u8, behavior: PortBehavior) -> Self {
        self.ports.insert(position, behavior);
        self
    }

    pub fn dock(mut self, dock: DockScenario) -> Self {
        self.dock = dock;
        self
    }

    pub fn biased_after(mut self, biased_after: Duration) -> Self {
        self.biased_after = biased_after;
        self
    }

    pub fn system_alarm(mut self, alarm: bool) -> Self {
        self.system_alarm = alarm;
        self
    }

    pub fn fault(mut self, fault: FaultScenario) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn build(self) -> SimulatedInstrument {
        SimulatedInstrument {
            state: Mutex::new(SimState {
                sensors: self.sensors.into_iter().map(|s| (s.position, s)).collect(),
                sensor_states: HashMap::new(),
                ports: self.ports,
                dry_ports: HashSet::new(),
                open: None,
                bad_tubing: false,
                dock: self.dock,
                started: Instant::now(),
                sensors_on_at: None,
                biased_after: self.biased_after,
                system_alarm: self.system_alarm,
                faults: FaultState::new(self.faults),
                events: Vec::new(),
            }),
        }
    }
}
