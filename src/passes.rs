//! Pass partitioner.
//!
//! Groups sensors into passes: every sensor bound to the same end point is
//! exposed in the same pass. Passes are numbered from 1 in the order their
//! end point was first selected, and sensors are visited by position, so a
//! fixed candidate order and sensor list always give the same plan.

use crate::gas_selection::{GasSelector, GasTarget, TriedSet};
use dock_core::{EndPointKey, GasEndPoint, OperationError, OperationResult};
use std::collections::BTreeMap;
use tracing::debug;

/// The passes of one selection round.
#[derive(Debug, Clone, Default)]
pub struct PassPlan {
    /// End point of pass `n` at index `n - 1`.
    end_points: Vec<GasEndPoint>,
    /// Sensor position to pass number.
    assignments: BTreeMap<u8, usize>,
}

impl PassPlan {
    /// Selects an end point for every target and groups them into passes.
    pub fn build(
        selector: &GasSelector,
        targets: &[GasTarget],
        candidates: &[GasEndPoint],
    ) -> OperationResult<Self> {
        let mut ordered: Vec<&GasTarget> = targets.iter().collect();
        ordered.sort_by_key(|t| t.position);

        let mut plan = PassPlan::default();
        let mut tried = TriedSet::new();
        for target in ordered {
            // Each sensor is its own selection round.
            tried.reset(candidates);
            let end_point = selector.select(target, candidates, &mut tried)?;
            let pass = plan.pass_for(end_point);
            debug!(position = target.position, pass, "Assigned sensor to pass");
            plan.assignments.insert(target.position, pass);
        }
        plan.verify(targets)?;
        Ok(plan)
    }

    fn pass_for(&mut self, end_point: GasEndPoint) -> usize {
        let key = end_point.key();
        match self.end_points.iter().position(|ep| ep.key() == key) {
            Some(index) => index + 1,
            None => {
                self.end_points.push(end_point);
                self.end_points.len()
            }
        }
    }

    /// Every pass up to the highest one must have an end point.
    fn verify(&self, targets: &[GasTarget]) -> OperationResult<()> {
        let max_pass = self.assignments.values().copied().max().unwrap_or(0);
        for pass in 1..=max_pass {
            if self.end_point(pass).is_none() {
                let target = targets
                    .iter()
                    .find(|t| self.assignments.get(&t.position) == Some(&pass));
                return Err(match target {
                    Some(t) => OperationError::CorrectGasUnavailable {
                        position: t.position,
                        gas: t.gas,
                        concentration: t.concentration,
                    },
                    None => OperationError::Configuration(format!("Pass {} has no end point", pass)),
                });
            }
        }
        Ok(())
    }

    pub fn pass_count(&self) -> usize {
        self.end_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.end_points.is_empty()
    }

    pub fn end_point(&self, pass: usize) -> Option<&GasEndPoint> {
        pass.checked_sub(1).and_then(|i| self.end_points.get(i))
    }

    pub fn pass_of(&self, position: u8) -> Option<usize> {
        self.assignments.get(&position).copied()
    }

    /// Positions exposed in `pass`, ascending.
    pub fn sensors_in(&self, pass: usize) -> Vec<u8> {
        self.assignments
            .iter()
            .filter(|(_, p)| **p == pass)
            .map(|(position, _)| *position)
            .collect()
    }

    /// `(pass, position)` pairs in execution order.
    pub fn order(&self) -> Vec<(usize, u8)> {
        let mut order: Vec<(usize, u8)> = self
            .assignments
            .iter()
            .map(|(position, pass)| (*pass, *position))
            .collect();
        order.sort();
        order
    }

    pub fn key_of(&self, pass: usize) -> Option<EndPointKey> {
        self.end_point(pass).map(GasEndPoint::key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use dock_core::{Cylinder, GasCode, GasConcentration, MeasurementUnit};

    fn selector() -> GasSelector {
        GasSelector::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    fn co(position: u8) -> GasTarget {
        GasTarget::new(position, GasCode::CarbonMonoxide, MeasurementUnit::Ppm, 100.0)
    }

    fn candidates() -> Vec<GasEndPoint> {
        vec![
            GasEndPoint::new(1, Cylinder::fresh_air()),
            GasEndPoint::new(
                2,
                Cylinder::calibration_gas(
                    "QUAD-1",
                    vec![
                        GasConcentration::new(GasCode::CarbonMonoxide, 100.0),
                        GasConcentration::new(GasCode::HydrogenSulfide, 25.0),
                        GasConcentration::new(GasCode::Methane, 25_000.0),
                        GasConcentration::new(GasCode::Oxygen, 180_000.0),
                    ],
                ),
            ),
            GasEndPoint::new(
                3,
                Cylinder::calibration_gas(
                    "NO2-10",
                    vec![GasConcentration::new(GasCode::NitrogenDioxide, 10.0)],
                ),
            ),
        ]
    }

    #[test]
    fn sensors_sharing_a_cylinder_share_a_pass() {
        let plan = PassPlan::build(&selector(), &[co(2), co(1)], &candidates()).unwrap();
        assert_eq!(plan.pass_count(), 1);
        assert_eq!(plan.pass_of(1), Some(1));
        assert_eq!(plan.pass_of(2), Some(1));
        assert_eq!(plan.sensors_in(1), vec![1, 2]);
        assert_eq!(plan.end_point(1).unwrap().position, 2);
    }

    #[test]
    fn passes_follow_first_selection() {
        let targets = [
            GasTarget::new(4, GasCode::Oxygen, MeasurementUnit::Vol, 18.0),
            GasTarget::new(1, GasCode::NitrogenDioxide, MeasurementUnit::Ppm, 10.0),
            GasTarget::new(3, GasCode::Methane, MeasurementUnit::Lel, 50.0),
            co(2),
        ];
        let plan = PassPlan::build(&selector(), &targets, &candidates()).unwrap();
        assert_eq!(plan.pass_count(), 2);
        assert_eq!(plan.key_of(1).unwrap().factory_id, "NO2-10");
        assert_eq!(plan.key_of(2).unwrap().factory_id, "QUAD-1");
        assert_eq!(plan.order(), vec![(1, 1), (2, 2), (2, 3), (2, 4)]);
    }

    #[test]
    fn plan_is_deterministic() {
        let targets = [co(1), co(2), GasTarget::new(3, GasCode::Oxygen, MeasurementUnit::Vol, 20.9)];
        let first = PassPlan::build(&selector(), &targets, &candidates()).unwrap();
        let second = PassPlan::build(&selector(), &targets, &candidates()).unwrap();
        assert_eq!(first.order(), second.order());
        assert_eq!(first.key_of(2), second.key_of(2));
        assert!(first.end_point(2).unwrap().cylinder.is_fresh_air);
    }

    #[test]
    fn emptied_cylinder_is_never_reselected() {
        let mut candidates = candidates();
        candidates[1].mark_empty();
        let err = PassPlan::build(&selector(), &[co(1)], &candidates).unwrap_err();
        assert!(matches!(
            err,
            OperationError::CorrectGasUnavailable { position: 1, .. }
        ));
    }
}
