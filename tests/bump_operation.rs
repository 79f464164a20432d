//! Full bump test runs against the simulated instrument.

mod common;

use common::*;
use dock_core::{
    ConsoleState, DockedInstrument, GasCode, GasUsage, OperationError, SensorCode, SensorStatus,
};
use dock_driver_mock::{
    CalibrationBehavior, ControllerEvent, DockScenario, PortBehavior, ReadingProfile, SimSensor,
    SimulatedInstrument,
};
use dockstation::{BumpSettings, BumpTestOperation, OperationContext};
use std::sync::Arc;
use std::time::Duration;

fn co_profile(delay_secs: u64) -> ReadingProfile {
    ReadingProfile::responsive(
        GasCode::CarbonMonoxide,
        0.0,
        90.0,
        Duration::from_secs(delay_secs),
    )
}

fn o2_profile() -> ReadingProfile {
    ReadingProfile::responsive(GasCode::Oxygen, 20.9, 18.1, Duration::ZERO)
}

/// `(begin, end)` counts of bump mode on the instrument.
fn bump_mode_changes(sim: &SimulatedInstrument) -> (usize, usize) {
    let events = sim.events();
    let count = |wanted: ControllerEvent| events.iter().filter(|e| **e == wanted).count();
    (count(ControllerEvent::BeginBump), count(ControllerEvent::EndBump))
}

fn recalibrates(passes: bool) -> CalibrationBehavior {
    CalibrationBehavior {
        duration: Duration::from_secs(10),
        passes,
        reading: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_shared_cylinder_is_opened_once() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).profile(co_profile(4)))
            .sensor(SimSensor::new(2).profile(co_profile(6)))
            .build(),
    );
    let instrument = DockedInstrument::new("MX4-1", vec![co_sensor(1), co_sensor(2)]);
    let mut op = BumpTestOperation::new(
        OperationContext::new(sim.clone()),
        BumpSettings::default(),
        instrument,
        vec![fresh_air(), co_cylinder(2, "CO-A")],
    );
    let result = op.execute().await.unwrap();

    assert!(result.passed());
    for position in [1, 2] {
        let response = result.response(position).unwrap();
        assert_eq!(response.status, SensorStatus::BumpPassed);
        let bumps: Vec<_> = response.usage_of(GasUsage::Bump).collect();
        assert_eq!(bumps.len(), 1);
        assert_eq!(bumps[0].pass, 1);
    }
    assert_eq!(sim.open_count(2), 1);
    assert!(result.emptied_end_points.is_empty());
    assert!(!sim.is_valve_open());
}

#[tokio::test(start_paused = true)]
async fn test_empty_cylinder_is_retried_on_the_next_one() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).profile(co_profile(12)))
            .port(2, PortBehavior::EmptiesAfter { after: Duration::from_secs(10) })
            .build(),
    );
    let console = Arc::new(RecordingConsole::default());
    let ctx = OperationContext::new(sim.clone()).with_console(console.clone());
    let mut op = BumpTestOperation::new(
        ctx,
        BumpSettings::default(),
        DockedInstrument::new("MX4-1", vec![co_sensor(1)]),
        vec![fresh_air(), co_cylinder(2, "CO-A"), co_cylinder(3, "CO-B")],
    );
    let result = op.execute().await.unwrap();

    let response = result.response(1).unwrap();
    assert_eq!(response.status, SensorStatus::BumpPassed);
    assert_eq!(result.emptied_end_points, vec![co_cylinder(2, "CO-A").key()]);
    assert_eq!(sim.open_count(2), 1);
    assert_eq!(sim.open_count(3), 1);
    assert_eq!(sim.bump_results().get(&1), Some(&true));

    let begins = sim
        .events()
        .into_iter()
        .filter(|e| *e == ControllerEvent::BeginBump)
        .count();
    assert_eq!(begins, 2);
    assert!(!console.saw(ConsoleState::CheckPumpTubing));
}

#[tokio::test(start_paused = true)]
async fn test_last_cylinder_running_dry_fails_the_bump() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).profile(co_profile(12)))
            .port(2, PortBehavior::EmptiesAfter { after: Duration::from_secs(10) })
            .build(),
    );
    let mut op = BumpTestOperation::new(
        OperationContext::new(sim.clone()),
        BumpSettings::default(),
        DockedInstrument::new("MX4-1", vec![co_sensor(1)]),
        vec![fresh_air(), co_cylinder(2, "CO-A")],
    );
    let err = op.execute().await.unwrap_err();

    match err {
        OperationError::FlowFailed {
            end_point,
            bad_pump_tubing,
        } => {
            assert_eq!(end_point, co_cylinder(2, "CO-A").key());
            assert!(!bad_pump_tubing);
        }
        other => panic!("expected a flow failure, got {other}"),
    }
    assert_eq!(op.emptied_end_points().len(), 1);
    let responses = op.responses();
    assert_eq!(responses[0].status, SensorStatus::BumpFailed);
    assert!(sim.bump_results().is_empty());
    assert!(!sim.is_valve_open());
    assert_eq!(bump_mode_changes(&sim), (2, 2));
}

#[tokio::test(start_paused = true)]
async fn test_bad_tubing_stops_the_bump() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).profile(co_profile(12)))
            .port(2, PortBehavior::BadTubingAfter { after: Duration::from_secs(10) })
            .build(),
    );
    let console = Arc::new(RecordingConsole::default());
    let ctx = OperationContext::new(sim.clone()).with_console(console.clone());
    let mut op = BumpTestOperation::new(
        ctx,
        BumpSettings::default(),
        DockedInstrument::new("MX4-1", vec![co_sensor(1)]),
        vec![fresh_air(), co_cylinder(2, "CO-A"), co_cylinder(3, "CO-B")],
    );
    let err = op.execute().await.unwrap_err();

    assert!(matches!(
        err,
        OperationError::FlowFailed {
            bad_pump_tubing: true,
            ..
        }
    ));
    assert!(console.saw(ConsoleState::CheckPumpTubing));
    assert_eq!(sim.open_count(2), 1);
    assert_eq!(sim.open_count(3), 0);
    assert_eq!(bump_mode_changes(&sim), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_passes_are_separated_by_a_purge() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).profile(co_profile(4)))
            .sensor(SimSensor::new(2).profile(ReadingProfile::responsive(
                GasCode::HydrogenSulfide,
                0.0,
                22.0,
                Duration::from_secs(4),
            )))
            .build(),
    );
    let mut op = BumpTestOperation::new(
        OperationContext::new(sim.clone()),
        BumpSettings::default(),
        DockedInstrument::new("MX4-1", vec![co_sensor(1), h2s_sensor(2)]),
        vec![fresh_air(), co_cylinder(2, "CO-A"), h2s_cylinder(3, "H2S-A")],
    );
    let result = op.execute().await.unwrap();
    assert!(result.passed());
    assert_eq!(result.response(2).unwrap().usage_of(GasUsage::Bump).next().map(|u| u.pass), Some(2));

    let valves: Vec<(bool, u8)> = sim
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ControllerEvent::Opened { position, .. } => Some((true, position)),
            ControllerEvent::Closed { position } => Some((false, position)),
            _ => None,
        })
        .collect();
    assert_eq!(
        valves,
        vec![
            (true, 2),
            (false, 2),
            // Cross-pass purge.
            (true, 1),
            (false, 1),
            (true, 3),
            (false, 3),
            // Final purge.
            (true, 1),
            (false, 1),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_undocking_aborts_the_bump() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).profile(co_profile(30)))
            .dock(DockScenario::UndockAfter { after: Duration::from_secs(5) })
            .build(),
    );
    let console = Arc::new(RecordingConsole::default());
    let ctx = OperationContext::new(sim.clone()).with_console(console.clone());
    let mut op = BumpTestOperation::new(
        ctx,
        BumpSettings::default(),
        DockedInstrument::new("MX4-1", vec![co_sensor(1)]),
        vec![fresh_air(), co_cylinder(2, "CO-A")],
    );
    let err = op.execute().await.unwrap_err();

    assert!(matches!(err, OperationError::InstrumentNotDocked));
    assert!(console.saw(ConsoleState::InstrumentRemoved));
    assert!(!sim.is_valve_open());
}

#[tokio::test(start_paused = true)]
async fn test_o2_recovers_on_fresh_air() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).profile(o2_profile()))
            .build(),
    );
    let mut op = BumpTestOperation::new(
        OperationContext::new(sim.clone()),
        BumpSettings::default(),
        DockedInstrument::new("MX4-1", vec![o2_sensor(1)]),
        vec![fresh_air(), quad_cylinder(2, "QUAD-1")],
    );
    let result = op.execute().await.unwrap();

    let response = result.response(1).unwrap();
    assert_eq!(response.status, SensorStatus::BumpPassed);
    assert!(response.usage_of(GasUsage::Bump).any(|u| u.end_point.position == 2));
    assert_eq!(sim.bump_results().get(&1), Some(&true));
    // Recovered without a recalibration.
    assert!(!sim
        .events()
        .iter()
        .any(|e| matches!(e, ControllerEvent::CalibrationStarted { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_o2_is_recalibrated_and_passes() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(
                SimSensor::new(1)
                    .profile(o2_profile().stuck_after_exposure(19.0))
                    .calibration(recalibrates(true)),
            )
            .build(),
    );
    let mut op = BumpTestOperation::new(
        OperationContext::new(sim.clone()),
        BumpSettings::default(),
        DockedInstrument::new("MX4-1", vec![o2_sensor(1)]),
        vec![fresh_air(), quad_cylinder(2, "QUAD-1")],
    );
    let result = op.execute().await.unwrap();

    let response = result.response(1).unwrap();
    assert_eq!(response.status, SensorStatus::BumpPassed);
    assert_eq!(response.usage_of(GasUsage::BumpHigh).count(), 1);
    assert!(sim
        .events()
        .contains(&ControllerEvent::CalibrationStarted { positions: vec![1] }));
    assert_eq!(sim.bump_results().get(&1), Some(&true));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_o2_failing_recalibration_is_high_bump_failed() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(
                SimSensor::new(1)
                    .profile(o2_profile().stuck_after_exposure(19.0))
                    .calibration(recalibrates(false)),
            )
            .build(),
    );
    let mut op = BumpTestOperation::new(
        OperationContext::new(sim.clone()),
        BumpSettings::default(),
        DockedInstrument::new("MX4-1", vec![o2_sensor(1)]),
        vec![fresh_air(), quad_cylinder(2, "QUAD-1")],
    );
    let result = op.execute().await.unwrap();

    assert_eq!(
        result.response(1).unwrap().status,
        SensorStatus::O2HighBumpFailed
    );
    assert!(!result.passed());
    assert_eq!(sim.bump_results().get(&1), Some(&false));
}

#[tokio::test(start_paused = true)]
async fn test_component_filter_skips_o2_recovery() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(
                SimSensor::new(1)
                    .profile(o2_profile().stuck_after_exposure(19.0))
                    .calibration(recalibrates(false)),
            )
            .build(),
    );
    let settings = BumpSettings {
        component_codes: vec![SensorCode::o2()],
        ..BumpSettings::default()
    };
    let mut op = BumpTestOperation::new(
        OperationContext::new(sim.clone()),
        settings,
        DockedInstrument::new("MX4-1", vec![o2_sensor(1)]),
        vec![fresh_air(), quad_cylinder(2, "QUAD-1")],
    );
    let result = op.execute().await.unwrap();

    assert_eq!(result.response(1).unwrap().status, SensorStatus::BumpPassed);
    assert!(!sim
        .events()
        .iter()
        .any(|e| matches!(e, ControllerEvent::CalibrationStarted { .. })));
}
