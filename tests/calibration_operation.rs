//! Full calibration runs against the simulated instrument.

mod common;

use common::*;
use dock_core::{ConsoleState, DockedInstrument, GasUsage, OperationError, SensorStatus};
use dock_driver_mock::{
    CalibrationBehavior, ControllerEvent, PortBehavior, SimSensor, SimulatedInstrument,
};
use dockstation::{CalibrationOperation, CalibrationSettings, OperationContext};
use std::sync::Arc;
use std::time::Duration;

fn spans_in(secs: u64) -> CalibrationBehavior {
    CalibrationBehavior {
        duration: Duration::from_secs(secs),
        passes: true,
        reading: Some(98.0),
    }
}

#[tokio::test(start_paused = true)]
async fn test_calibration_reports_progress() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).calibration(spans_in(10)))
            .build(),
    );
    let console = Arc::new(RecordingConsole::default());
    let ctx = OperationContext::new(sim.clone()).with_console(console.clone());
    let mut op = CalibrationOperation::new(
        ctx,
        CalibrationSettings::default(),
        DockedInstrument::new("MX4-1", vec![co_sensor(1)]),
        vec![fresh_air(), co_cylinder(2, "CO-A")],
    );
    let result = op.execute().await.unwrap();

    assert!(result.passed());
    let states = console.states();
    assert_eq!(states.first(), Some(&ConsoleState::Calibrating));
    assert!(states.contains(&ConsoleState::Zeroing));
    assert!(states.contains(&ConsoleState::Purging));
    assert!(result.cumulative_response_time >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_calibration_retries_on_the_next_cylinder() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).calibration(spans_in(10)))
            .port(2, PortBehavior::EmptiesAfter { after: Duration::from_secs(6) })
            .build(),
    );
    let mut op = CalibrationOperation::new(
        OperationContext::new(sim.clone()),
        CalibrationSettings::default(),
        DockedInstrument::new("MX4-1", vec![co_sensor(1)]),
        vec![fresh_air(), co_cylinder(2, "CO-A"), co_cylinder(3, "CO-B")],
    );
    let result = op.execute().await.unwrap();

    let response = result.response(1).unwrap();
    assert_eq!(response.status, SensorStatus::SpanPassed);
    assert_eq!(response.usage_of(GasUsage::Calibration).count(), 2);
    assert_eq!(result.emptied_end_points, vec![co_cylinder(2, "CO-A").key()]);
    assert_eq!(sim.open_count(3), 1);

    let begins = sim
        .events()
        .into_iter()
        .filter(|e| *e == ControllerEvent::BeginCalibration)
        .count();
    assert_eq!(begins, 2);
}

#[tokio::test(start_paused = true)]
async fn test_calibration_without_cal_gas() {
    let sim = Arc::new(SimulatedInstrument::builder().sensor(SimSensor::new(1)).build());
    let mut op = CalibrationOperation::new(
        OperationContext::new(sim.clone()),
        CalibrationSettings::default(),
        DockedInstrument::new("MX4-1", vec![co_sensor(1)]),
        vec![fresh_air()],
    );
    let result = op.execute().await.unwrap();

    let response = result.response(1).unwrap();
    assert_eq!(response.status, SensorStatus::GasUnavailable);
    assert!(!result.passed());
    assert_eq!(sim.open_count(2), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bad_tubing_stops_the_calibration() {
    let sim = Arc::new(
        SimulatedInstrument::builder()
            .sensor(SimSensor::new(1).calibration(spans_in(10)))
            .port(2, PortBehavior::BadTubingAfter { after: Duration::from_secs(4) })
            .build(),
    );
    let console = Arc::new(RecordingConsole::default());
    let ctx = OperationContext::new(sim.clone()).with_console(console.clone());
    let mut op = CalibrationOperation::new(
        ctx,
        CalibrationSettings { zero_sensors: false },
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
    assert_eq!(sim.open_count(3), 0);
    let events = sim.events();
    let count = |wanted: ControllerEvent| events.iter().filter(|e| **e == wanted).count();
    assert_eq!(count(ControllerEvent::BeginCalibration), 1);
    assert_eq!(count(ControllerEvent::EndCalibration), 1);
}
