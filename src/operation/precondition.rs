//! Preconditioning: exposes sensors to the pass gas before the real
//! exposure so slow sensors are primed.
//!
//! Preconditioning is diagnostic. Whatever happens here, each response's
//! status is restored afterwards; only a pump stop escapes, as a flow
//! failure on the pass end point.

use super::working::{PreconditionFailure, PreconditionState, TestState};
use super::{OperationContext, OperationState};
use chrono::Utc;
use dock_core::{GasEndPoint, GasUsage, OperationError, OperationResult, UsedGasEndPoint};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Odd readings that fail preconditioning.
const MAX_ODD_READINGS: u32 = 3;

/// Good readings that pass preconditioning.
const REQUIRED_GOOD_READINGS: u32 = 2;

/// Span reserve a reading must exceed to count as good, in percent.
const GOOD_SPAN_RESERVE: f64 = 50.0;

enum PollExit {
    Finished,
    TimedOut,
    PumpClosed,
}

/// Preconditions the idle sensors of `pass` on `end_point`.
///
/// Returns the time the gas was on, or zero when no sensor needed it.
pub(crate) async fn precondition_pass(
    ctx: &OperationContext,
    state: &mut OperationState,
    pass: usize,
    end_point: &GasEndPoint,
) -> OperationResult<Duration> {
    let mut active = Vec::new();
    for (index, work) in state.sensors.iter_mut().enumerate() {
        if !work.in_pass(pass) || work.state != TestState::Idle {
            continue;
        }
        if work.precondition.settings.is_some() {
            active.push(index);
        } else {
            work.precondition.state = PreconditionState::Skipped;
        }
    }
    if active.is_empty() {
        return Ok(Duration::ZERO);
    }

    let settings = active
        .iter()
        .filter_map(|&i| state.sensors[i].precondition.settings);
    let flow_rate = settings.clone().map(|s| s.flow_rate).max().unwrap_or(0);
    // One timeout for the whole pass: the longest any sensor asks for.
    let timeout = settings.map(|s| s.timeout).max().unwrap_or_default();

    let key = end_point.key();
    info!(pass, end_point = %key, sensors = active.len(), flow_rate, "Preconditioning");

    let saved: Vec<_> = active
        .iter()
        .map(|&i| (i, state.sensors[i].response.status))
        .collect();
    let started_at = Utc::now();
    for &i in &active {
        let work = &mut state.sensors[i];
        work.precondition.state = PreconditionState::Preconditioning;
        work.precondition.total_readings = 0;
        work.precondition.odd_readings = 0;
        work.precondition.good_readings = 0;
        work.response.time_precondition_started = Some(started_at);
    }

    let start = Instant::now();
    ctx.controller.open_gas_end_point(end_point, flow_rate).await?;
    let polled = poll(ctx, state, &active, timeout).await;
    let closed = ctx.controller.close_gas_end_point(end_point).await;
    let elapsed = start.elapsed();

    let finished_at = Utc::now();
    for (i, status) in saved {
        let work = &mut state.sensors[i];
        work.response.status = status;
        work.response.time_precondition_finished = Some(finished_at);
        work.response.record_usage(UsedGasEndPoint::new(
            key.clone(),
            GasUsage::Precondition,
            elapsed,
            pass,
        ));
    }

    let exit = polled?;
    closed?;

    let failed = match exit {
        PollExit::Finished => None,
        PollExit::TimedOut => Some(PreconditionFailure::TimedOut),
        PollExit::PumpClosed => Some(PreconditionFailure::PumpClosed),
    };
    if let Some(reason) = failed {
        for &i in &active {
            let work = &mut state.sensors[i];
            if work.precondition.state == PreconditionState::Preconditioning {
                warn!(position = work.position(), %reason, "Preconditioning failed");
                work.precondition.state = PreconditionState::Failed(reason);
            }
        }
    }

    if let PollExit::PumpClosed = exit {
        let bad_pump_tubing = ctx.controller.is_bad_pump_tubing().await?;
        return Err(OperationError::FlowFailed {
            end_point: key,
            bad_pump_tubing,
        });
    }
    Ok(elapsed)
}

async fn poll(
    ctx: &OperationContext,
    state: &mut OperationState,
    active: &[usize],
    timeout: Duration,
) -> OperationResult<PollExit> {
    for &i in active {
        ctx.controller
            .set_sensor_gas_flow_paused(state.sensors[i].position(), false)
            .await?;
    }

    let half = timeout / 2;
    let start = Instant::now();
    loop {
        sleep(ctx.timing.precondition_poll).await;
        ctx.ensure_docked().await?;
        let elapsed = start.elapsed();

        if !ctx.pump_flowing().await? {
            return Ok(PollExit::PumpClosed);
        }
        if elapsed >= timeout {
            return Ok(PollExit::TimedOut);
        }

        for &i in active {
            let work = &mut state.sensors[i];
            if work.precondition.state != PreconditionState::Preconditioning {
                continue;
            }
            let reading = ctx
                .controller
                .sensor_reading(work.position(), work.sensor.resolution)
                .await?;
            let counts = &mut work.precondition;
            counts.total_readings += 1;

            if reading.abs() > work.max_reading {
                // Warm-up noise in the first half of the window is tolerated.
                if elapsed < half {
                    continue;
                }
                counts.odd_readings += 1;
                debug!(position = work.sensor.position, reading, odd = counts.odd_readings, "Odd precondition reading");
                if counts.odd_readings >= MAX_ODD_READINGS {
                    counts.state = PreconditionState::Failed(PreconditionFailure::TooManyOddReadings);
                    warn!(position = work.sensor.position, "Preconditioning failed: too many odd readings");
                }
                continue;
            }

            let good = match work.ppm_limit() {
                Some(limit) => reading >= limit,
                None => work.span_reserve(reading) > GOOD_SPAN_RESERVE,
            };
            let counts = &mut work.precondition;
            if good {
                counts.good_readings += 1;
                if counts.good_readings >= REQUIRED_GOOD_READINGS {
                    counts.state = PreconditionState::Passed;
                    debug!(position = work.sensor.position, "Preconditioning passed");
                }
            }
        }

        let still_running = active.iter().any(|&i| {
            state.sensors[i].precondition.state == PreconditionState::Preconditioning
        });
        if !still_running {
            return Ok(PollExit::Finished);
        }
    }
}
