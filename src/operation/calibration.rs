//! Calibration operation: zero on reference air, then span every sensor on
//! its calibration gas.

use super::exposure::ExposureMode;
use super::purge::final_purge;
use super::retry::{end, run_with_retry};
use super::working::{PassAssignment, SensorWork};
use super::{
    prepare_instrument, screen_gas, CalibrationSettings, OperationContext, OperationState,
};
use crate::gas_selection::GasTarget;
use chrono::Utc;
use dock_core::{
    ConsoleState, DockedInstrument, EndPointKey, GasEndPoint, GasOperationResult, GasUsage,
    OperationError, OperationKind, OperationResult, SensorGasResponse, SensorStatus,
    UsedGasEndPoint,
};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// One calibration of the docked instrument.
pub struct CalibrationOperation {
    ctx: OperationContext,
    settings: CalibrationSettings,
    instrument: DockedInstrument,
    state: OperationState,
}

impl CalibrationOperation {
    /// `end_points` is the operation's own copy of the station catalog.
    pub fn new(
        ctx: OperationContext,
        settings: CalibrationSettings,
        instrument: DockedInstrument,
        end_points: Vec<GasEndPoint>,
    ) -> Self {
        let state = OperationState::new(end_points, instrument.requires_zero_air());
        Self {
            ctx,
            settings,
            instrument,
            state,
        }
    }

    /// Runs the calibration.
    ///
    /// Unexpected failures are wrapped into
    /// [`OperationError::FailedCalibration`].
    #[instrument(skip(self), fields(instrument = %self.instrument.serial))]
    pub async fn execute(&mut self) -> OperationResult<GasOperationResult> {
        info!("Starting calibration");
        let sequenced = self.run_gas_sequence().await;
        final_purge(&self.ctx, &mut self.state).await;
        sequenced.map_err(OperationError::into_calibration_failure)?;

        let result = self
            .state
            .finish(OperationKind::Calibration, &self.instrument.serial);
        info!(
            passed = result.passed(),
            cumulative_ms = result.cumulative_response_time.as_millis() as u64,
            "Calibration finished"
        );
        Ok(result)
    }

    pub fn responses(&self) -> Vec<SensorGasResponse> {
        self.state.responses()
    }

    pub fn emptied_end_points(&self) -> &[EndPointKey] {
        &self.state.emptied
    }

    async fn run_gas_sequence(&mut self) -> OperationResult<()> {
        self.ctx.console.report(ConsoleState::Calibrating);
        prepare_instrument(&self.ctx, &self.instrument).await?;
        self.init_sensors().await?;
        if self.settings.zero_sensors {
            self.zero().await?;
        }
        run_with_retry(&self.ctx, &mut self.state, ExposureMode::Calibration).await?;
        end(&self.ctx, ExposureMode::Calibration).await
    }

    async fn init_sensors(&mut self) -> OperationResult<()> {
        let controller = &self.ctx.controller;
        for sensor in self.instrument.sensors.iter().filter(|s| s.enabled) {
            let position = sensor.position;
            let mut work = SensorWork::new(sensor.clone(), GasTarget::calibration(sensor));
            work.flow_rate = controller.sensor_calibration_flow_rate(position).await?;
            work.timeout = controller.sensor_calibration_timeout(position).await?;
            work.max_reading = controller
                .sensor_max_reading(position, sensor.resolution)
                .await?;
            work.precondition.settings = controller.precondition_settings(position).await?;
            screen_gas(&self.ctx, &self.state.candidates, &mut work);
            self.state.sensors.push(work);
        }
        Ok(())
    }

    /// Zeroes every non-O2 sensor still in the running on reference air.
    async fn zero(&mut self) -> OperationResult<()> {
        let zeroing: Vec<usize> = self
            .state
            .sensors
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.assignment.is_excluded() && !w.sensor.is_o2())
            .map(|(i, _)| i)
            .collect();
        if zeroing.is_empty() {
            return Ok(());
        }
        let Some(end_point) = self.state.reference_air() else {
            warn!("No reference air installed, skipping zero");
            return Ok(());
        };
        let flow_rate = zeroing
            .iter()
            .map(|&i| self.state.sensors[i].flow_rate)
            .max()
            .unwrap_or(0);
        let positions: Vec<u8> = zeroing
            .iter()
            .map(|&i| self.state.sensors[i].position())
            .collect();
        let key = end_point.key();
        info!(end_point = %key, ?positions, "Zeroing sensors");
        self.ctx.console.report(ConsoleState::Zeroing);

        let started_at = Utc::now();
        let start = Instant::now();
        self.ctx
            .controller
            .open_gas_end_point(&end_point, flow_rate)
            .await?;
        let zeroed = self.zero_on_flow(&positions).await;
        let closed = self.ctx.controller.close_gas_end_point(&end_point).await;
        let elapsed = start.elapsed();
        let finished_at = Utc::now();

        for &i in &zeroing {
            let response = &mut self.state.sensors[i].response;
            response.time_zero_started = Some(started_at);
            response.time_zero_finished = Some(finished_at);
            response.record_usage(UsedGasEndPoint::new(key.clone(), GasUsage::Zero, elapsed, 0));
        }

        let zeroed = match zeroed? {
            Some(zeroed) => zeroed,
            None => {
                closed?;
                let bad_pump_tubing = self.ctx.controller.is_bad_pump_tubing().await?;
                if bad_pump_tubing {
                    self.ctx.console.report(ConsoleState::CheckPumpTubing);
                } else {
                    self.state.mark_empty(&key);
                }
                return Err(OperationError::FlowFailed {
                    end_point: key,
                    bad_pump_tubing,
                });
            }
        };
        closed?;

        for &i in &zeroing {
            let work = &mut self.state.sensors[i];
            if zeroed.contains(&work.position()) {
                work.response.status = SensorStatus::ZeroPassed;
            } else {
                warn!(position = work.position(), "Sensor failed to zero");
                work.exclude(PassAssignment::FailedZero, SensorStatus::ZeroFailed);
            }
        }
        Ok(())
    }

    /// Lets the reference air settle, then zeroes. `None` once flow is lost.
    async fn zero_on_flow(&self, positions: &[u8]) -> OperationResult<Option<Vec<u8>>> {
        self.ctx.wait_docked(self.ctx.timing.zero_settle).await?;
        if !self.ctx.pump_flowing().await? {
            return Ok(None);
        }
        Ok(Some(self.ctx.controller.zero_sensors(positions).await?))
    }
}
