//! Outcome and retry controller.
//!
//! Runs selection, partitioning and every pass. A flow failure on an empty
//! cylinder is not an error here: it comes back as
//! [`SequenceOutcome::FlowFailure`], the cylinder is marked empty and the
//! whole sequence starts over without it. Sensors that already settled keep
//! their outcome.

use super::exposure::{expose_pass, ExposureMode};
use super::precondition::precondition_pass;
use super::purge::cross_pass_purge;
use super::working::TestState;
use super::{OperationContext, OperationState};
use crate::gas_selection::{GasSelector, GasTarget};
use crate::passes::PassPlan;
use dock_core::{
    ConsoleState, FlowFailure, GasEndPoint, OperationError, OperationResult,
};
use tracing::{info, warn};

/// How one run of the pass sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SequenceOutcome {
    Completed,
    FlowFailure(FlowFailure),
}

/// Runs the pass sequence until it completes without a recoverable flow
/// failure.
pub(crate) async fn run_with_retry(
    ctx: &OperationContext,
    state: &mut OperationState,
    mode: ExposureMode,
) -> OperationResult<()> {
    loop {
        begin(ctx, mode).await?;
        let outcome = match run_sequence(ctx, state, mode).await {
            Ok(outcome) => outcome,
            Err(e) => {
                end_after_failure(ctx, mode, &e).await;
                return Err(e);
            }
        };
        match outcome {
            SequenceOutcome::Completed => return Ok(()),
            SequenceOutcome::FlowFailure(failure) => {
                warn!(
                    end_point = %failure.end_point,
                    bad_pump_tubing = failure.bad_pump_tubing,
                    "Gas flow failed"
                );
                state.mark_empty(&failure.end_point);
                if failure.bad_pump_tubing {
                    ctx.console.report(ConsoleState::CheckPumpTubing);
                    let err = OperationError::flow_failed(failure);
                    end_after_failure(ctx, mode, &err).await;
                    return Err(err);
                }
                end(ctx, mode).await?;
                for work in state.sensors.iter_mut() {
                    if work.assignment.pass().is_some() && !work.state.is_settled() {
                        work.unassign();
                    }
                }
                info!(end_point = %failure.end_point, "Retrying without the emptied cylinder");
            }
        }
    }
}

async fn begin(ctx: &OperationContext, mode: ExposureMode) -> OperationResult<()> {
    match mode {
        ExposureMode::Bump(_) => {
            ctx.console.report(ConsoleState::Bumping);
            ctx.controller.begin_bump().await?;
        }
        ExposureMode::Calibration => {
            ctx.console.report(ConsoleState::Calibrating);
            ctx.controller.begin_calibration().await?;
        }
    }
    Ok(())
}

/// Leaves bump or calibration mode on the instrument.
pub(crate) async fn end(ctx: &OperationContext, mode: ExposureMode) -> OperationResult<()> {
    match mode {
        ExposureMode::Bump(_) => ctx.controller.end_bump().await?,
        ExposureMode::Calibration => ctx.controller.end_calibration().await?,
    }
    Ok(())
}

/// Leaves bump or calibration mode after the sequence failed. The instrument
/// is gone once undocked, and a failure here never replaces `cause`.
async fn end_after_failure(ctx: &OperationContext, mode: ExposureMode, cause: &OperationError) {
    if matches!(cause, OperationError::InstrumentNotDocked) {
        return;
    }
    if let Err(e) = end(ctx, mode).await {
        warn!(error = %e, cause = %cause, "Failed to leave gas mode");
    }
}

/// One selection round followed by every pass.
pub(crate) async fn run_sequence(
    ctx: &OperationContext,
    state: &mut OperationState,
    mode: ExposureMode,
) -> OperationResult<SequenceOutcome> {
    let targets: Vec<GasTarget> = state
        .sensors
        .iter()
        .filter(|w| w.needs_gas())
        .map(|w| w.target)
        .collect();
    if targets.is_empty() {
        return Ok(SequenceOutcome::Completed);
    }

    let selector = GasSelector::new(ctx.today);
    let plan = match PassPlan::build(&selector, &targets, &state.candidates) {
        Ok(plan) => plan,
        Err(e @ OperationError::CorrectGasUnavailable { .. }) => {
            // A retry that runs out of gas is reported as the flow failure
            // that caused it.
            return Err(match state.emptied.last() {
                Some(emptied) => OperationError::FlowFailed {
                    end_point: emptied.clone(),
                    bad_pump_tubing: false,
                },
                None => e,
            });
        }
        Err(e) => return Err(e),
    };

    for (pass, position) in plan.order() {
        let Some(end_point) = plan.end_point(pass) else {
            continue;
        };
        if let Some(work) = state.sensors.iter_mut().find(|w| w.position() == position) {
            work.assign(pass, end_point);
            info!(position, pass, end_point = %end_point.key(), "Sensor assigned");
        }
    }

    for pass in 1..=plan.pass_count() {
        ctx.ensure_docked().await?;
        let Some(end_point) = plan.end_point(pass).cloned() else {
            return Err(OperationError::Configuration(format!(
                "Pass {} has no end point",
                pass
            )));
        };

        if let Err(e) = run_pass(ctx, state, pass, &end_point, mode).await {
            return match e.as_flow_failure() {
                Some(failure) => Ok(SequenceOutcome::FlowFailure(failure)),
                None => Err(e),
            };
        }
    }
    Ok(SequenceOutcome::Completed)
}

async fn run_pass(
    ctx: &OperationContext,
    state: &mut OperationState,
    pass: usize,
    end_point: &GasEndPoint,
    mode: ExposureMode,
) -> OperationResult<()> {
    let idle = state
        .sensors
        .iter()
        .any(|w| w.in_pass(pass) && w.state == TestState::Idle);
    if !idle {
        return Ok(());
    }

    let key = end_point.key();
    if state
        .last_pass_end_point
        .as_ref()
        .is_some_and(|last| *last != key)
    {
        cross_pass_purge(ctx, state, pass).await?;
    }
    // The pass has idle sensors, so its valve opens below.
    state.last_pass_end_point = Some(key);

    if mode == ExposureMode::Calibration {
        for work in state.sensors.iter().filter(|w| w.in_pass(pass) && w.state == TestState::Idle) {
            ctx.controller
                .set_calibration_gas_concentration(work.position(), work.applied_concentration)
                .await?;
        }
    }

    precondition_pass(ctx, state, pass, end_point).await?;
    expose_pass(ctx, state, pass, end_point, mode).await?;
    Ok(())
}
