//! O2 recovery after a bump test.
//!
//! An O2 sensor that was bumped with depleted oxygen has to climb back to
//! ambient on fresh air. A sensor that does not recover in time is
//! recalibrated on fresh air once and then given a high-bump check.

use super::exposure::o2_window;
use super::working::SensorWork;
use super::{OperationContext, OperationState};
use dock_core::gas::O2_REFERENCE_VOL;
use dock_core::{
    ConsoleState, GasCode, GasEndPoint, GasUsage, OperationResult, SensorStatus, UsedGasEndPoint,
};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Reading an O2 sensor must reach on fresh air, in %VOL.
const O2_RECOVERED_VOL: f64 = 20.0;

/// Combines the bump verdict with the recovery verdict.
pub(crate) fn merge(bump_passed: bool, recovered: bool) -> SensorStatus {
    match (bump_passed, recovered) {
        (true, true) => SensorStatus::BumpPassed,
        (false, true) => SensorStatus::BumpFailed,
        (true, false) => SensorStatus::O2HighBumpFailed,
        (false, false) => SensorStatus::BumpFailed,
    }
}

/// Runs recovery for every bumped O2 sensor. Returns `(sensor index,
/// recovered)` pairs; empty when there is nothing to check.
pub(crate) async fn o2_recovery(
    ctx: &OperationContext,
    state: &mut OperationState,
) -> OperationResult<Vec<(usize, bool)>> {
    let o2: Vec<usize> = state
        .sensors
        .iter()
        .enumerate()
        .filter(|(_, w)| {
            w.sensor.is_o2()
                && matches!(
                    w.response.status,
                    SensorStatus::BumpPassed | SensorStatus::BumpFailed
                )
        })
        .map(|(i, _)| i)
        .collect();
    if o2.is_empty() {
        return Ok(Vec::new());
    }
    let Some(fresh_air) = state
        .candidates
        .iter()
        .find(|ep| ep.cylinder.is_fresh_air && !ep.cylinder.is_empty())
        .cloned()
    else {
        warn!("No fresh air end point, skipping O2 recovery");
        return Ok(Vec::new());
    };

    let flow_rate = o2.iter().map(|&i| state.sensors[i].flow_rate).max().unwrap_or(0);
    info!(sensors = o2.len(), "Checking O2 recovery");
    ctx.console.report(ConsoleState::Purging);

    ctx.controller.open_gas_end_point(&fresh_air, flow_rate).await?;
    let result = recover(ctx, state, &o2, &fresh_air).await;
    let closed = ctx.controller.close_gas_end_point(&fresh_air).await;
    let recovered = result?;
    closed?;
    Ok(recovered)
}

async fn recover(
    ctx: &OperationContext,
    state: &mut OperationState,
    o2: &[usize],
    fresh_air: &GasEndPoint,
) -> OperationResult<Vec<(usize, bool)>> {
    let mut recovered: Vec<(usize, bool)> = o2.iter().map(|&i| (i, false)).collect();
    let start = Instant::now();
    loop {
        sleep(ctx.timing.exposure_poll).await;
        ctx.ensure_docked().await?;
        if !ctx.pump_flowing().await? {
            warn!("Flow lost during O2 recovery");
            break;
        }
        for (i, done) in recovered.iter_mut().filter(|(_, done)| !*done) {
            let work = &mut state.sensors[*i];
            let reading = ctx
                .controller
                .sensor_reading(work.position(), work.sensor.resolution)
                .await?;
            if reading >= O2_RECOVERED_VOL {
                debug!(position = work.position(), reading, "O2 recovered");
                *done = true;
            }
        }
        if recovered.iter().all(|(_, done)| *done)
            || start.elapsed() >= ctx.timing.o2_recovery_timeout
        {
            break;
        }
    }

    let elapsed = start.elapsed();
    let key = fresh_air.key();
    for &(i, _) in &recovered {
        state.sensors[i].response.record_usage(UsedGasEndPoint::new(
            key.clone(),
            GasUsage::Purge,
            elapsed,
            0,
        ));
    }

    for (i, done) in recovered.iter_mut().filter(|(_, done)| !*done) {
        let work = &mut state.sensors[*i];
        warn!(position = work.position(), "O2 sensor did not recover, recalibrating on fresh air");
        *done = recalibrate_and_check(ctx, work, fresh_air).await?;
    }
    Ok(recovered)
}

/// Single-sensor fresh-air recalibration followed by a high-bump check.
async fn recalibrate_and_check(
    ctx: &OperationContext,
    work: &mut SensorWork,
    fresh_air: &GasEndPoint,
) -> OperationResult<bool> {
    let position = work.position();
    let key = fresh_air.key();
    let reference = fresh_air
        .cylinder
        .concentration_of(GasCode::Oxygen)
        .and_then(|ppm| work.sensor.unit.from_ppm(ppm, GasCode::Oxygen))
        .unwrap_or(O2_REFERENCE_VOL);

    ctx.controller
        .set_calibration_gas_concentration(position, reference)
        .await?;
    ctx.controller.begin_sensor_calibration(&[position]).await?;
    let timeout = ctx.controller.sensor_calibration_timeout(position).await?;
    let start = Instant::now();
    let finished = loop {
        sleep(ctx.timing.exposure_poll).await;
        ctx.ensure_docked().await?;
        if !ctx.controller.is_sensor_calibrating(position).await? {
            break true;
        }
        if start.elapsed() >= timeout {
            break false;
        }
    };
    work.response.record_usage(UsedGasEndPoint::new(
        key.clone(),
        GasUsage::Calibration,
        start.elapsed(),
        0,
    ));
    if !finished {
        warn!(position, "O2 recalibration timed out");
        return Ok(false);
    }
    let verdict = ctx.controller.calibration_verdict(position).await?;
    if !verdict.passed {
        warn!(position, reading = verdict.reading, "O2 recalibration failed");
        return Ok(false);
    }

    let (low, high) = o2_window(reference);
    let start = Instant::now();
    let passed = loop {
        sleep(ctx.timing.exposure_poll).await;
        ctx.ensure_docked().await?;
        let reading = ctx
            .controller
            .sensor_reading(position, work.sensor.resolution)
            .await?;
        if reading > low && reading < high {
            work.response.reading = reading;
            break true;
        }
        if start.elapsed() >= work.timeout {
            break false;
        }
    };
    work.response.record_usage(UsedGasEndPoint::new(
        key,
        GasUsage::BumpHigh,
        start.elapsed(),
        0,
    ));
    info!(position, passed, "O2 high bump after recalibration");
    Ok(passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_table() {
        assert_eq!(merge(true, true), SensorStatus::BumpPassed);
        assert_eq!(merge(false, true), SensorStatus::BumpFailed);
        assert_eq!(merge(true, false), SensorStatus::O2HighBumpFailed);
        assert_eq!(merge(false, false), SensorStatus::BumpFailed);
    }
}
