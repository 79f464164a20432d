//! Shared fixtures for the operation tests.

#![allow(dead_code)]

use dock_core::{
    ConsoleReporter, ConsoleState, Cylinder, GasCode, GasConcentration, GasEndPoint,
    InstalledSensor, MeasurementUnit, SensorCode,
};
use parking_lot::Mutex;

/// Console that remembers every state it was shown.
#[derive(Debug, Default)]
pub struct RecordingConsole {
    states: Mutex<Vec<ConsoleState>>,
}

impl RecordingConsole {
    pub fn states(&self) -> Vec<ConsoleState> {
        self.states.lock().clone()
    }

    pub fn saw(&self, state: ConsoleState) -> bool {
        self.states.lock().contains(&state)
    }
}

impl ConsoleReporter for RecordingConsole {
    fn report(&self, state: ConsoleState) {
        self.states.lock().push(state);
    }
}

pub fn fresh_air() -> GasEndPoint {
    GasEndPoint::new(1, Cylinder::fresh_air())
}

pub fn co_cylinder(position: u8, factory_id: &str) -> GasEndPoint {
    GasEndPoint::new(
        position,
        Cylinder::calibration_gas(
            factory_id,
            vec![GasConcentration::new(GasCode::CarbonMonoxide, 100.0)],
        ),
    )
}

pub fn h2s_cylinder(position: u8, factory_id: &str) -> GasEndPoint {
    GasEndPoint::new(
        position,
        Cylinder::calibration_gas(
            factory_id,
            vec![GasConcentration::new(GasCode::HydrogenSulfide, 25.0)],
        ),
    )
}

/// CO 100, H2S 25, CH4 50 %LEL and O2 18 %VOL.
pub fn quad_cylinder(position: u8, factory_id: &str) -> GasEndPoint {
    GasEndPoint::new(
        position,
        Cylinder::calibration_gas(
            factory_id,
            vec![
                GasConcentration::new(GasCode::CarbonMonoxide, 100.0),
                GasConcentration::new(GasCode::HydrogenSulfide, 25.0),
                GasConcentration::new(GasCode::Methane, 25000.0),
                GasConcentration::new(GasCode::Oxygen, 180000.0),
            ],
        ),
    )
}

pub fn co_sensor(position: u8) -> InstalledSensor {
    InstalledSensor::new(
        position,
        SensorCode::CO,
        GasCode::CarbonMonoxide,
        MeasurementUnit::Ppm,
        100.0,
    )
}

pub fn h2s_sensor(position: u8) -> InstalledSensor {
    InstalledSensor::new(
        position,
        SensorCode::H2S,
        GasCode::HydrogenSulfide,
        MeasurementUnit::Ppm,
        25.0,
    )
}

pub fn o2_sensor(position: u8) -> InstalledSensor {
    InstalledSensor::new(position, SensorCode::O2, GasCode::Oxygen, MeasurementUnit::Vol, 20.9)
        .with_bump_concentration(18.0)
}
