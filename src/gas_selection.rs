//! Gas selection engine.
//!
//! Picks the end point a sensor is exposed to from the station's candidate
//! list. Selection walks the candidates in order, three times at most:
//!
//! 1. An oxygen target at the 20.9 %VOL reference is served by zero air,
//!    then fresh air, without looking at regular cylinders.
//! 2. A cylinder holding exactly the target concentration.
//! 3. A cylinder holding any concentration of the target gas.
//!
//! Both scans reject cylinders that were already tried, are empty or
//! expired, exceed 60 %LEL of a combustible target, or (for oxygen targets)
//! are reference air or hold more than 19 %VOL O2. An oxygen target that is
//! not at the reference falls back to fresh air when both scans come up
//! empty.

use chrono::NaiveDate;
use dock_core::gas::{is_o2_reference, PPM_PER_VOL_PERCENT};
use dock_core::{
    EndPointKey, GasCode, GasEndPoint, InstalledSensor, MeasurementUnit, OperationError,
    OperationResult,
};
use std::collections::HashSet;
use tracing::debug;

/// Highest %LEL a combustible cylinder may have.
pub const MAX_LEL_PERCENT: f64 = 60.0;

/// Highest O2 content a depletion cylinder may have, in %VOL.
pub const MAX_O2_VOL_PERCENT: f64 = 19.0;

/// What a sensor needs to be exposed to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasTarget {
    pub position: u8,
    pub gas: GasCode,
    pub unit: MeasurementUnit,
    /// Concentration in `unit`.
    pub concentration: f64,
}

impl GasTarget {
    pub fn new(position: u8, gas: GasCode, unit: MeasurementUnit, concentration: f64) -> Self {
        Self {
            position,
            gas,
            unit,
            concentration,
        }
    }

    /// Target of a bump test.
    pub fn bump(sensor: &InstalledSensor) -> Self {
        Self::new(
            sensor.position,
            sensor.gas,
            sensor.unit,
            sensor.bump_target_concentration(),
        )
    }

    /// Target of a span calibration.
    pub fn calibration(sensor: &InstalledSensor) -> Self {
        Self::new(
            sensor.position,
            sensor.gas,
            sensor.unit,
            sensor.cal_gas_concentration,
        )
    }

    /// Target concentration in ppm.
    pub fn ppm(&self) -> f64 {
        self.unit
            .to_ppm(self.concentration, self.gas)
            .unwrap_or(self.concentration)
    }

    pub fn is_o2(&self) -> bool {
        self.gas == GasCode::Oxygen
    }

    /// Oxygen target at the 20.9 %VOL reference.
    pub fn is_o2_reference(&self) -> bool {
        self.is_o2() && is_o2_reference(self.ppm() / PPM_PER_VOL_PERCENT)
    }

    fn unavailable(&self) -> OperationError {
        OperationError::CorrectGasUnavailable {
            position: self.position,
            gas: self.gas,
            concentration: self.concentration,
        }
    }
}

/// End points already handed out during a selection round.
///
/// A round covers one sensor: the partitioner resets the set before each
/// sensor so sensors needing the same gas can share a cylinder. Only
/// emptied end points survive a reset.
#[derive(Debug, Clone, Default)]
pub struct TriedSet {
    keys: HashSet<EndPointKey>,
}

impl TriedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: EndPointKey) -> bool {
        self.keys.insert(key)
    }

    pub fn contains(&self, key: &EndPointKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Re-admits every tried end point whose cylinder is not empty.
    pub fn reset(&mut self, candidates: &[GasEndPoint]) {
        self.keys.retain(|key| {
            candidates
                .iter()
                .any(|ep| ep.key() == *key && ep.cylinder.is_empty())
        });
    }
}

/// Chooses end points for sensors.
#[derive(Debug, Clone, Copy)]
pub struct GasSelector {
    today: NaiveDate,
}

impl GasSelector {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Selects an end point for `target` and records it in `tried`.
    pub fn select(
        &self,
        target: &GasTarget,
        candidates: &[GasEndPoint],
        tried: &mut TriedSet,
    ) -> OperationResult<GasEndPoint> {
        let chosen = self
            .find(target, candidates, tried)
            .ok_or_else(|| target.unavailable())?;
        debug!(
            position = target.position,
            gas = %target.gas,
            end_point = %chosen.key(),
            "Selected gas end point"
        );
        tried.insert(chosen.key());
        Ok(chosen.clone())
    }

    /// `true` when the target gas is installed but every cylinder holding it
    /// has expired.
    pub fn expired_only(&self, target: &GasTarget, candidates: &[GasEndPoint]) -> bool {
        let mut right_gas = candidates
            .iter()
            .filter(|ep| !ep.cylinder.is_reference_air() && ep.cylinder.contains(target.gas))
            .peekable();
        right_gas.peek().is_some() && right_gas.all(|ep| ep.cylinder.is_expired(self.today))
    }

    fn find<'a>(
        &self,
        target: &GasTarget,
        candidates: &'a [GasEndPoint],
        tried: &TriedSet,
    ) -> Option<&'a GasEndPoint> {
        if target.is_o2_reference() {
            let reference = self
                .first_usable(candidates, tried, |ep| ep.cylinder.is_zero_air)
                .or_else(|| self.first_usable(candidates, tried, |ep| ep.cylinder.is_fresh_air));
            if reference.is_some() {
                return reference;
            }
        }

        let ppm = target.ppm();
        let exact = self.first_usable(candidates, tried, |ep| {
            ep.cylinder.contains_exactly(target.gas, ppm) && self.within_limits(target, ep)
        });
        if exact.is_some() {
            return exact;
        }

        let any = self.first_usable(candidates, tried, |ep| {
            ep.cylinder.contains(target.gas) && self.within_limits(target, ep)
        });
        if any.is_some() {
            return any;
        }

        if target.is_o2() && !target.is_o2_reference() {
            debug!(position = target.position, "No O2 cylinder, falling back to fresh air");
            return self.first_usable(candidates, tried, |ep| ep.cylinder.is_fresh_air);
        }
        None
    }

    fn first_usable<'a>(
        &self,
        candidates: &'a [GasEndPoint],
        tried: &TriedSet,
        accept: impl Fn(&GasEndPoint) -> bool,
    ) -> Option<&'a GasEndPoint> {
        candidates.iter().find(|ep| {
            !tried.contains(&ep.key())
                && !ep.cylinder.is_empty()
                && !ep.cylinder.is_expired(self.today)
                && accept(ep)
        })
    }

    fn within_limits(&self, target: &GasTarget, end_point: &GasEndPoint) -> bool {
        let cylinder = &end_point.cylinder;
        if target.gas.lel_multiplier() > 0.0 && cylinder.lel_percent(target.gas) > MAX_LEL_PERCENT {
            return false;
        }
        if target.is_o2() {
            if cylinder.is_reference_air() {
                return false;
            }
            if cylinder
                .o2_vol_percent()
                .is_some_and(|vol| vol > MAX_O2_VOL_PERCENT)
            {
                return false;
            }
        }
        true
    }
}
