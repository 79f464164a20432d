//! Reading profiles for simulated sensors.
//!
//! A profile turns "what is flowing right now" into a sensor reading:
//!
//! - **Constant**: always the same value
//! - **Responsive**: baseline until its gas flows for `delay`, then `exposed`
//! - **Timeline**: value keyed by time since the current valve opened
//! - **Sequence**: value keyed by how many times the sensor was read

use dock_core::{Cylinder, GasCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One step of a [`ReadingProfile::Timeline`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    #[serde(with = "humantime_serde")]
    pub at: Duration,
    pub value: f64,
}

/// How a simulated sensor reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadingProfile {
    Constant {
        value: f64,
    },
    Responsive {
        gas: GasCode,
        baseline: f64,
        exposed: f64,
        #[serde(with = "humantime_serde", default)]
        delay: Duration,
        /// Reading held after exposure ends, until the sensor is recalibrated.
        #[serde(default)]
        stuck_after_exposure: Option<f64>,
    },
    Timeline {
        points: Vec<TimelinePoint>,
    },
    Sequence {
        values: Vec<f64>,
    },
}

/// What the sensor currently sees.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExposureView<'a> {
    pub open_cylinder: Option<&'a Cylinder>,
    pub since_open: Option<Duration>,
    pub read_index: usize,
    pub was_exposed: bool,
}

impl ReadingProfile {
    pub fn constant(value: f64) -> Self {
        ReadingProfile::Constant { value }
    }

    /// Baseline until `gas` has flowed for `delay`.
    pub fn responsive(gas: GasCode, baseline: f64, exposed: f64, delay: Duration) -> Self {
        ReadingProfile::Responsive {
            gas,
            baseline,
            exposed,
            delay,
            stuck_after_exposure: None,
        }
    }

    /// Timeline from `(seconds, value)` pairs.
    pub fn timeline(points: &[(u64, f64)]) -> Self {
        ReadingProfile::Timeline {
            points: points
                .iter()
                .map(|&(secs, value)| TimelinePoint {
                    at: Duration::from_secs(secs),
                    value,
                })
                .collect(),
        }
    }

    pub fn sequence(values: Vec<f64>) -> Self {
        ReadingProfile::Sequence { values }
    }

    /// Holds `value` after exposure until recalibrated.
    pub fn stuck_after_exposure(mut self, value: f64) -> Self {
        if let ReadingProfile::Responsive {
            stuck_after_exposure,
            ..
        } = &mut self
        {
            *stuck_after_exposure = Some(value);
        }
        self
    }

    /// `true` when the profile's gas is currently reaching the sensor.
    pub(crate) fn is_exposed(&self, view: &ExposureView<'_>) -> bool {
        match self {
            ReadingProfile::Responsive { gas, delay, .. } => match (view.open_cylinder, view.since_open) {
                (Some(cylinder), Some(since_open)) => {
                    cylinder.contains(*gas) && !cylinder.is_reference_air() && since_open >= *delay
                }
                _ => false,
            },
            _ => false,
        }
    }

    pub(crate) fn reading(&self, view: &ExposureView<'_>) -> f64 {
        match self {
            ReadingProfile::Constant { value } => *value,
            ReadingProfile::Responsive {
                baseline,
                exposed,
                stuck_after_exposure,
                ..
            } => {
                if self.is_exposed(view) {
                    *exposed
                } else if view.was_exposed {
                    stuck_after_exposure.unwrap_or(*baseline)
                } else {
                    *baseline
                }
            }
            ReadingProfile::Timeline { points } => {
                let Some(first) = points.first() else {
                    return 0.0;
                };
                match view.since_open {
                    Some(since_open) => points
                        .iter()
                        .take_while(|p| p.at <= since_open)
                        .last()
                        .unwrap_or(first)
                        .value,
                    None => first.value,
                }
            }
            ReadingProfile::Sequence { values } => values
                .get(view.read_index)
                .or_else(|| values.last())
                .copied()
                .unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dock_core::GasConcentration;

    fn view<'a>(cylinder: Option<&'a Cylinder>, secs: Option<u64>) -> ExposureView<'a> {
        ExposureView {
            open_cylinder: cylinder,
            since_open: secs.map(Duration::from_secs),
            read_index: 0,
            was_exposed: false,
        }
    }

    #[test]
    fn responsive_waits_for_delay() {
        let co = Cylinder::calibration_gas(
            "CO",
            vec![GasConcentration::new(GasCode::CarbonMonoxide, 100.0)],
        );
        let profile =
            ReadingProfile::responsive(GasCode::CarbonMonoxide, 0.0, 90.0, Duration::from_secs(4));
        assert_eq!(profile.reading(&view(Some(&co), Some(2))), 0.0);
        assert_eq!(profile.reading(&view(Some(&co), Some(4))), 90.0);
        assert_eq!(profile.reading(&view(None, None)), 0.0);
    }

    #[test]
    fn responsive_ignores_reference_air() {
        let profile = ReadingProfile::responsive(GasCode::Oxygen, 20.9, 18.0, Duration::ZERO);
        let fresh = Cylinder::fresh_air();
        assert_eq!(profile.reading(&view(Some(&fresh), Some(10))), 20.9);
    }

    #[test]
    fn stuck_value_after_exposure() {
        let profile = ReadingProfile::responsive(GasCode::Oxygen, 20.9, 18.0, Duration::ZERO)
            .stuck_after_exposure(19.0);
        let cyl = Cylinder::fresh_air();
        let mut v = view(Some(&cyl), Some(3));
        v.was_exposed = true;
        assert_eq!(profile.reading(&v), 19.0);
    }

    #[test]
    fn timeline_steps() {
        let profile = ReadingProfile::timeline(&[(0, 0.0), (5, 40.0), (10, 80.0)]);
        let co = Cylinder::fresh_air();
        assert_eq!(profile.reading(&view(Some(&co), Some(4))), 0.0);
        assert_eq!(profile.reading(&view(Some(&co), Some(7))), 40.0);
        assert_eq!(profile.reading(&view(Some(&co), Some(30))), 80.0);
    }

    #[test]
    fn sequence_repeats_last_value() {
        let profile = ReadingProfile::sequence(vec![1.0, 2.0]);
        let mut v = view(None, None);
        v.read_index = 5;
        assert_eq!(profile.reading(&v), 2.0);
    }
}
