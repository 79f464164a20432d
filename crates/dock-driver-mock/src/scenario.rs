//! Failure scenarios for the simulated station.
//!
//! Enables empty cylinders, tubing faults, undocking and communication
//! failures for resilience testing.

use dock_core::{ControllerError, ControllerErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How gas behaves on one station port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortBehavior {
    /// Delivers gas for as long as it is open.
    #[default]
    Normal,
    /// Runs dry after being open for `after`; stays dry afterwards.
    EmptiesAfter {
        #[serde(with = "humantime_serde")]
        after: Duration,
    },
    /// The pump stops after `after` because the tubing is pinched or split.
    BadTubingAfter {
        #[serde(with = "humantime_serde")]
        after: Duration,
    },
}

/// When the instrument leaves the cradle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DockScenario {
    #[default]
    AlwaysDocked,
    /// Undocked once this much time has passed since the simulator started.
    UndockAfter {
        #[serde(with = "humantime_serde")]
        after: Duration,
    },
}

/// How a simulated sensor responds to span calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBehavior {
    /// Gas-on time the instrument needs to finish spanning.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub passes: bool,
    /// Reading reported with the verdict; `None` reports the live reading.
    #[serde(default)]
    pub reading: Option<f64>,
}

impl Default for CalibrationBehavior {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(20),
            passes: true,
            reading: None,
        }
    }
}

/// Injected communication failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultScenario {
    /// Fail an operation after N successful calls.
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// Every call fails.
    CommunicationLoss,
}

/// Tracks calls for [`FaultScenario`]s.
#[derive(Debug, Default)]
pub(crate) struct FaultState {
    scenarios: Vec<FaultScenario>,
    operation_counts: HashMap<&'static str, u32>,
}

impl FaultState {
    pub fn new(scenarios: Vec<FaultScenario>) -> Self {
        Self {
            scenarios,
            operation_counts: HashMap::new(),
        }
    }

    /// Check if an operation should fail and return the appropriate error.
    pub fn check(&mut self, operation: &'static str) -> Result<(), ControllerError> {
        for scenario in &self.scenarios {
            match scenario {
                FaultScenario::CommunicationLoss => {
                    return Err(ControllerError::communication("Communication lost"));
                }
                FaultScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = self.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(ControllerError::new(
                            ControllerErrorKind::Communication,
                            format!("Injected {} failure after {} calls", operation, count),
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_after_n() {
        let mut state = FaultState::new(vec![FaultScenario::FailAfterN {
            operation: "sensor_reading",
            count: 2,
        }]);
        assert!(state.check("sensor_reading").is_ok());
        assert!(state.check("sensor_reading").is_ok());
        assert!(state.check("sensor_reading").is_err());
        assert!(state.check("pump_valve_position").is_ok());
    }

    #[test]
    fn test_communication_loss() {
        let mut state = FaultState::new(vec![FaultScenario::CommunicationLoss]);
        let err = state.check("is_docked").unwrap_err();
        assert_eq!(err.kind, ControllerErrorKind::Communication);
    }

    #[test]
    fn test_port_behavior_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            behavior: PortBehavior,
        }
        let wrapper: Wrapper =
            toml::from_str("behavior = { type = \"empties_after\", after = \"10s\" }").unwrap();
        assert_eq!(
            wrapper.behavior,
            PortBehavior::EmptiesAfter {
                after: Duration::from_secs(10)
            }
        );
    }
}
