//! Exposure loop: one pass of gas over every sensor bound to its end point.
//!
//! The same loop runs bump tests and span calibrations. In bump mode each
//! reading is judged against the sensor's criterion; in calibration mode the
//! instrument decides and the loop waits for it.

use super::working::{SensorWork, TestState};
use super::{OperationContext, OperationState};
use dock_core::gas::O2_REFERENCE_VOL;
use dock_core::{
    BumpCriterion, GasEndPoint, GasUsage, OperationError, OperationResult, SensorStatus,
    UsedGasEndPoint,
};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// How readings are judged in bump mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BumpCriteria {
    pub threshold_override: Option<f64>,
    pub min_consecutive: u32,
}

impl BumpCriteria {
    pub fn passes(&self, work: &SensorWork, reading: f64) -> bool {
        match work.sensor.bump_criterion {
            BumpCriterion::FullSpanValue(threshold) => {
                work.span_reserve(reading) >= self.threshold_override.unwrap_or(threshold)
            }
            BumpCriterion::PpmLimit(limit) => reading >= limit,
            BumpCriterion::O2 => {
                let (low, high) = o2_window(work.applied_o2_vol.unwrap_or(O2_REFERENCE_VOL));
                reading > low && reading < high
            }
        }
    }
}

/// Pass window of an O2 reading for a cylinder holding `cylinder_vol` %VOL O2.
pub(crate) fn o2_window(cylinder_vol: f64) -> (f64, f64) {
    if cylinder_vol >= 20.0 {
        (20.4, 21.4)
    } else if cylinder_vol >= 18.0 {
        (15.0, 19.5)
    } else {
        (1.0, 19.5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ExposureMode {
    Bump(BumpCriteria),
    Calibration,
}

/// Exposes the idle sensors of `pass` to `end_point`.
///
/// Returns the time the gas was on. A pump stop during the pass is reported
/// as [`OperationError::FlowFailed`] after every sensor's outcome is written.
pub(crate) async fn expose_pass(
    ctx: &OperationContext,
    state: &mut OperationState,
    pass: usize,
    end_point: &GasEndPoint,
    mode: ExposureMode,
) -> OperationResult<Duration> {
    let active: Vec<usize> = state
        .sensors
        .iter()
        .enumerate()
        .filter(|(_, w)| w.in_pass(pass) && w.state == TestState::Idle)
        .map(|(i, _)| i)
        .collect();
    if active.is_empty() {
        return Ok(Duration::ZERO);
    }

    let flow_rate = active
        .iter()
        .map(|&i| state.sensors[i].flow_rate)
        .max()
        .unwrap_or(0);
    let pass_timeout = active
        .iter()
        .map(|&i| state.sensors[i].timeout)
        .max()
        .unwrap_or_default();
    let pause = active
        .iter()
        .map(|&i| state.sensors[i].precondition.pause())
        .max()
        .unwrap_or_default();

    if !pause.is_zero() {
        debug!(pass, pause_ms = pause.as_millis() as u64, "Pausing gas flow");
        for &i in &active {
            ctx.controller
                .set_sensor_gas_flow_paused(state.sensors[i].position(), true)
                .await?;
        }
        ctx.wait_docked(pause).await?;
        for &i in &active {
            ctx.controller
                .set_sensor_gas_flow_paused(state.sensors[i].position(), false)
                .await?;
        }
    }

    for &i in &active {
        let work = &mut state.sensors[i];
        work.state = TestState::Testing;
        work.consecutive_passes = 0;
    }

    let key = end_point.key();
    info!(pass, end_point = %key, sensors = active.len(), flow_rate, "Exposing sensors");

    let start = Instant::now();
    ctx.controller.open_gas_end_point(end_point, flow_rate).await?;
    let polled = run(ctx, state, &active, pass_timeout, mode).await;
    let closed = ctx.controller.close_gas_end_point(end_point).await;
    let elapsed = start.elapsed();
    let pump_closed = polled?;
    closed?;

    for &i in &active {
        let work = &mut state.sensors[i];
        if work.state == TestState::Testing {
            work.state = if pump_closed {
                TestState::FailedPumpClosed
            } else {
                TestState::FailedTimedOut
            };
            work.response.duration = elapsed;
        }
        let (usage, status) = match mode {
            ExposureMode::Bump(_) => (
                work.bump_usage(end_point),
                if work.state == TestState::Passed {
                    SensorStatus::BumpPassed
                } else {
                    SensorStatus::BumpFailed
                },
            ),
            ExposureMode::Calibration => (
                GasUsage::Calibration,
                if work.state == TestState::Passed {
                    SensorStatus::SpanPassed
                } else {
                    SensorStatus::SpanFailed
                },
            ),
        };
        work.response.status = status;
        work.response
            .record_usage(UsedGasEndPoint::new(key.clone(), usage, elapsed, pass));
        info!(position = work.position(), pass, state = ?work.state, "Sensor finished pass");
    }
    state.cumulative_response_time += elapsed;

    if pump_closed {
        let bad_pump_tubing = ctx.controller.is_bad_pump_tubing().await?;
        warn!(pass, end_point = %key, bad_pump_tubing, "Gas flow stopped during exposure");
        return Err(OperationError::FlowFailed {
            end_point: key,
            bad_pump_tubing,
        });
    }
    Ok(elapsed)
}

/// Polls until every sensor is done, the pass times out, or the pump stops.
/// Returns `true` when the pump stopped.
async fn run(
    ctx: &OperationContext,
    state: &mut OperationState,
    active: &[usize],
    pass_timeout: Duration,
    mode: ExposureMode,
) -> OperationResult<bool> {
    if mode == ExposureMode::Calibration {
        let positions: Vec<u8> = active.iter().map(|&i| state.sensors[i].position()).collect();
        ctx.controller.begin_sensor_calibration(&positions).await?;
    }

    let start = Instant::now();
    loop {
        sleep(ctx.timing.exposure_poll).await;
        ctx.ensure_docked().await?;
        let elapsed = start.elapsed();

        if !ctx.pump_flowing().await? {
            return Ok(true);
        }

        for &i in active {
            let work = &mut state.sensors[i];
            if work.state != TestState::Testing {
                continue;
            }
            match mode {
                ExposureMode::Bump(criteria) => {
                    let reading = ctx
                        .controller
                        .sensor_reading(work.position(), work.sensor.resolution)
                        .await?;
                    judge_reading(ctx, work, reading, elapsed, criteria);
                }
                ExposureMode::Calibration => {
                    if !ctx.controller.is_sensor_calibrating(work.position()).await? {
                        let verdict = ctx.controller.calibration_verdict(work.position()).await?;
                        work.response.reading = verdict.reading;
                        work.response.duration = elapsed;
                        work.state = if verdict.passed {
                            TestState::Passed
                        } else {
                            TestState::Failed
                        };
                        debug!(position = work.position(), passed = verdict.passed, "Calibration finished");
                    }
                }
            }
            if work.state == TestState::Testing && elapsed >= work.timeout {
                debug!(position = work.position(), "Sensor timed out");
                work.state = TestState::FailedTimedOut;
                work.response.duration = elapsed;
            }
        }

        let testing = active
            .iter()
            .any(|&i| state.sensors[i].state == TestState::Testing);
        if !testing || elapsed >= pass_timeout {
            return Ok(false);
        }
    }
}

fn judge_reading(
    ctx: &OperationContext,
    work: &mut SensorWork,
    reading: f64,
    elapsed: Duration,
    criteria: BumpCriteria,
) {
    if reading > work.max_reading {
        debug!(position = work.position(), reading, "Discarding out-of-range reading");
        return;
    }
    work.response.reading = reading;
    // Settling: record the reading, do not score it.
    if elapsed < ctx.timing.settling_grace {
        return;
    }
    if criteria.passes(work, reading) {
        work.consecutive_passes += 1;
    } else {
        work.consecutive_passes = 0;
    }
    if work.consecutive_passes >= criteria.min_consecutive.max(1) {
        work.state = TestState::Passed;
        work.response.duration = elapsed;
        debug!(position = work.position(), reading, "Sensor passed");
    }
}
