//! Reference-air purges between passes and after the last one.

use super::{OperationContext, OperationState};
use chrono::Utc;
use dock_core::{ConsoleState, GasUsage, OperationError, OperationResult, UsedGasEndPoint};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Purges the lines with reference air before `pass`.
///
/// Losing flow is only fatal when the pump tubing is bad.
pub(crate) async fn cross_pass_purge(
    ctx: &OperationContext,
    state: &mut OperationState,
    pass: usize,
) -> OperationResult<()> {
    purge(ctx, state, ctx.timing.cross_pass_purge, pass).await
}

/// Purges after the last pass. Failures are logged, never returned, so they
/// cannot hide the outcome of the passes.
pub(crate) async fn final_purge(ctx: &OperationContext, state: &mut OperationState) {
    if let Err(e) = purge(ctx, state, ctx.timing.final_purge, 0).await {
        warn!(error = %e, "Final purge failed");
    }
}

async fn purge(
    ctx: &OperationContext,
    state: &mut OperationState,
    duration: Duration,
    pass: usize,
) -> OperationResult<()> {
    if duration.is_zero() {
        return Ok(());
    }
    let Some(end_point) = state.reference_air() else {
        warn!(pass, "No reference air installed, skipping purge");
        return Ok(());
    };
    let flow_rate = state
        .sensors
        .iter()
        .map(|w| w.flow_rate)
        .max()
        .unwrap_or(0);
    let key = end_point.key();
    info!(pass, end_point = %key, duration_ms = duration.as_millis() as u64, "Purging");
    ctx.console.report(ConsoleState::Purging);

    let started_at = Utc::now();
    let start = Instant::now();
    ctx.controller.open_gas_end_point(&end_point, flow_rate).await?;
    let waited = wait_flowing(ctx, duration).await;
    let closed = ctx.controller.close_gas_end_point(&end_point).await;
    let elapsed = start.elapsed();
    let finished_at = Utc::now();

    for work in state.sensors.iter_mut().filter(|w| w.assignment.pass().is_some()) {
        work.response.time_purge_started = Some(started_at);
        work.response.time_purge_finished = Some(finished_at);
        work.response.record_usage(UsedGasEndPoint::new(
            key.clone(),
            GasUsage::Purge,
            elapsed,
            pass,
        ));
    }

    let flowed = waited?;
    closed?;
    if !flowed {
        if ctx.controller.is_bad_pump_tubing().await? {
            ctx.console.report(ConsoleState::CheckPumpTubing);
            return Err(OperationError::FlowFailed {
                end_point: key,
                bad_pump_tubing: true,
            });
        }
        warn!(end_point = %key, "Flow lost during purge");
    }
    Ok(())
}

/// Waits `duration`, checking dock and flow each poll. `false` once flow is lost.
async fn wait_flowing(ctx: &OperationContext, duration: Duration) -> OperationResult<bool> {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(true);
        }
        tokio::time::sleep((deadline - now).min(ctx.timing.exposure_poll)).await;
        ctx.ensure_docked().await?;
        if !ctx.pump_flowing().await? {
            return Ok(false);
        }
    }
}
