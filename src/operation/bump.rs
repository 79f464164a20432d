//! Bump test operation.
//!
//! Exposes every scheduled sensor to its bump gas and judges the readings
//! against the sensor's bump criterion. O2 sensors are additionally checked
//! for recovery on fresh air once the gas sequence is over.

use super::exposure::{BumpCriteria, ExposureMode};
use super::o2::{merge, o2_recovery};
use super::purge::final_purge;
use super::retry::{end, run_with_retry};
use super::working::{PassAssignment, SensorWork};
use super::{prepare_instrument, screen_gas, BumpSettings, OperationContext, OperationState};
use crate::gas_selection::GasTarget;
use dock_core::{
    ConsoleState, DockedInstrument, EndPointKey, GasEndPoint, GasOperationResult, OperationError,
    OperationKind, OperationResult, SensorCode, SensorGasResponse, SensorStatus,
};
use tracing::{info, instrument, warn};

/// Whether the post-bump O2 recovery runs for this component filter.
///
/// Kept exactly as the station has always evaluated it: with a non-empty
/// filter recovery never runs, even when the filter names the O2 sensor.
pub(crate) fn o2_recovery_enabled(component_codes: &[SensorCode]) -> bool {
    let filtered = !component_codes.is_empty();
    !filtered && !component_codes.iter().any(|c| c.is(SensorCode::O2))
}

/// One bump test of the docked instrument.
pub struct BumpTestOperation {
    ctx: OperationContext,
    settings: BumpSettings,
    instrument: DockedInstrument,
    state: OperationState,
}

impl BumpTestOperation {
    /// `end_points` is the operation's own copy of the station catalog.
    pub fn new(
        ctx: OperationContext,
        settings: BumpSettings,
        instrument: DockedInstrument,
        end_points: Vec<GasEndPoint>,
    ) -> Self {
        let state = OperationState::new(end_points, instrument.requires_zero_air());
        Self {
            ctx,
            settings,
            instrument,
            state,
        }
    }

    /// Runs the bump test.
    ///
    /// Unexpected failures are wrapped into
    /// [`OperationError::FailedBumpTest`]; the partial responses stay
    /// available through [`responses`](Self::responses).
    #[instrument(skip(self), fields(instrument = %self.instrument.serial))]
    pub async fn execute(&mut self) -> OperationResult<GasOperationResult> {
        info!("Starting bump test");
        let sequenced = self.run_gas_sequence().await;
        final_purge(&self.ctx, &mut self.state).await;
        sequenced.map_err(OperationError::into_bump_failure)?;

        if o2_recovery_enabled(&self.settings.component_codes) {
            self.recover_o2().await;
        }
        self.record_results()
            .await
            .map_err(OperationError::into_bump_failure)?;

        let result = self
            .state
            .finish(OperationKind::BumpTest, &self.instrument.serial);
        info!(
            passed = result.passed(),
            cumulative_ms = result.cumulative_response_time.as_millis() as u64,
            "Bump test finished"
        );
        Ok(result)
    }

    /// Responses as they stand, also after a failed run.
    pub fn responses(&self) -> Vec<SensorGasResponse> {
        self.state.responses()
    }

    /// End points found empty during the run.
    pub fn emptied_end_points(&self) -> &[EndPointKey] {
        &self.state.emptied
    }

    async fn run_gas_sequence(&mut self) -> OperationResult<()> {
        self.ctx.console.report(ConsoleState::Bumping);
        prepare_instrument(&self.ctx, &self.instrument).await?;
        self.init_sensors().await?;

        let mode = ExposureMode::Bump(BumpCriteria {
            threshold_override: self.settings.threshold_percent,
            min_consecutive: self.settings.min_consecutive_readings,
        });
        run_with_retry(&self.ctx, &mut self.state, mode).await?;
        end(&self.ctx, mode).await
    }

    async fn init_sensors(&mut self) -> OperationResult<()> {
        let controller = &self.ctx.controller;
        let filter = &self.settings.component_codes;

        for sensor in self.instrument.sensors.iter().filter(|s| s.enabled) {
            let target = GasTarget::bump(sensor);
            let mut work = SensorWork::new(sensor.clone(), target);

            if !sensor.bump_enabled {
                work.exclude(PassAssignment::NotBumpEnabled, SensorStatus::Skipped);
            } else if !filter.is_empty() && !filter.contains(&sensor.sensor_code) {
                work.exclude(PassAssignment::SkippedBySchedule, SensorStatus::Skipped);
            } else {
                let position = sensor.position;
                work.flow_rate = controller.sensor_bump_flow_rate(position).await?;
                work.timeout = controller.sensor_bump_timeout(position).await?;
                work.max_reading = controller
                    .sensor_max_reading(position, sensor.resolution)
                    .await?;
                work.precondition.settings = controller.precondition_settings(position).await?;
                screen_gas(&self.ctx, &self.state.candidates, &mut work);
            }
            self.state.sensors.push(work);
        }
        Ok(())
    }

    async fn recover_o2(&mut self) {
        match o2_recovery(&self.ctx, &mut self.state).await {
            Ok(recovered) => {
                for (index, ok) in recovered {
                    let work = &mut self.state.sensors[index];
                    let bump_passed = work.response.status == SensorStatus::BumpPassed;
                    work.response.status = merge(bump_passed, ok);
                    info!(position = work.position(), status = ?work.response.status, "O2 recovery merged");
                }
            }
            Err(e) => warn!(error = %e, "O2 recovery failed"),
        }
    }

    async fn record_results(&self) -> OperationResult<()> {
        for work in &self.state.sensors {
            let passed = match work.response.status {
                SensorStatus::BumpPassed => true,
                SensorStatus::BumpFailed | SensorStatus::O2HighBumpFailed => false,
                _ => continue,
            };
            self.ctx
                .controller
                .record_bump_result(work.position(), passed)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dock_core::{Cylinder, GasCode, GasConcentration, InstalledSensor, MeasurementUnit};
    use dock_driver_mock::{ControllerEvent, ReadingProfile, SimSensor, SimulatedInstrument};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn o2_recovery_only_without_filter() {
        assert!(o2_recovery_enabled(&[]));
        assert!(!o2_recovery_enabled(&[SensorCode::new(SensorCode::CO)]));
        assert!(!o2_recovery_enabled(&[SensorCode::o2()]));
    }

    fn co_sensor() -> InstalledSensor {
        InstalledSensor::new(1, SensorCode::CO, GasCode::CarbonMonoxide, MeasurementUnit::Ppm, 100.0)
    }

    fn catalog() -> Vec<GasEndPoint> {
        vec![
            GasEndPoint::new(1, Cylinder::fresh_air()),
            GasEndPoint::new(
                2,
                Cylinder::calibration_gas(
                    "CO-100",
                    vec![GasConcentration::new(GasCode::CarbonMonoxide, 100.0)],
                ),
            ),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn bump_passes_and_is_recorded() {
        let sim = Arc::new(
            SimulatedInstrument::builder()
                .sensor(SimSensor::new(1).profile(ReadingProfile::responsive(
                    GasCode::CarbonMonoxide,
                    0.0,
                    80.0,
                    Duration::ZERO,
                )))
                .build(),
        );
        let instrument = DockedInstrument::new("SN-1", vec![co_sensor()]);
        let mut op = BumpTestOperation::new(
            OperationContext::new(sim.clone()),
            BumpSettings::default(),
            instrument,
            catalog(),
        );
        let result = op.execute().await.unwrap();

        assert_eq!(result.kind, OperationKind::BumpTest);
        assert_eq!(result.responses[0].status, SensorStatus::BumpPassed);
        assert_eq!(result.responses[0].gas_concentration, 100.0);
        assert_eq!(sim.bump_results().get(&1), Some(&true));
        assert!(sim.events().contains(&ControllerEvent::EndBump));
        assert!(!sim.is_valve_open());
    }

    #[tokio::test(start_paused = true)]
    async fn unscheduled_and_disabled_sensors_are_skipped() {
        let sim = Arc::new(
            SimulatedInstrument::builder()
                .sensor(SimSensor::new(1))
                .sensor(SimSensor::new(2))
                .build(),
        );
        let h2s = InstalledSensor::new(2, SensorCode::H2S, GasCode::HydrogenSulfide, MeasurementUnit::Ppm, 25.0);
        let instrument = DockedInstrument::new(
            "SN-1",
            vec![co_sensor().with_bump_enabled(false), h2s],
        );
        let settings = BumpSettings {
            component_codes: vec![SensorCode::new(SensorCode::CO)],
            ..BumpSettings::default()
        };
        let mut op = BumpTestOperation::new(OperationContext::new(sim.clone()), settings, instrument, catalog());
        let result = op.execute().await.unwrap();

        assert!(result.responses.iter().all(|r| r.status == SensorStatus::Skipped));
        assert_eq!(sim.open_count(2), 0);
        assert!(sim.bump_results().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_gas_is_reported_on_the_sensor() {
        let sim = Arc::new(SimulatedInstrument::builder().sensor(SimSensor::new(1)).build());
        let instrument = DockedInstrument::new("SN-1", vec![co_sensor()]);
        let expired = Cylinder::calibration_gas(
            "CO-OLD",
            vec![GasConcentration::new(GasCode::CarbonMonoxide, 100.0)],
        )
        .with_expiration(chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        let end_points = vec![
            GasEndPoint::new(1, Cylinder::fresh_air()),
            GasEndPoint::new(2, expired),
        ];
        let mut op = BumpTestOperation::new(
            OperationContext::new(sim.clone()),
            BumpSettings::default(),
            instrument,
            end_points,
        );
        let result = op.execute().await.unwrap();
        assert_eq!(result.responses[0].status, SensorStatus::GasExpired);
        assert_eq!(sim.open_count(2), 0);
    }
}
