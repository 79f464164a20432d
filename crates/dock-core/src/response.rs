//! Per-sensor results handed to persistence and upload.
//!
//! A [`SensorGasResponse`] is built once per evaluated sensor and becomes
//! part of the result returned by the operation. Its `used_end_points` list
//! is an append-only ledger of every gas delivery the sensor saw.

use crate::cylinder::EndPointKey;
use crate::gas::GasCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Final status of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    /// Not evaluated (disabled, filtered out, or not yet reached).
    #[default]
    Skipped,
    BumpPassed,
    BumpFailed,
    /// Bump passed but the O2 sensor never recovered on fresh air.
    O2HighBumpFailed,
    ZeroPassed,
    ZeroFailed,
    SpanPassed,
    SpanFailed,
    /// Every cylinder holding the sensor's gas is past its expiration date.
    GasExpired,
    /// No cylinder holds the sensor's gas.
    GasUnavailable,
}

impl SensorStatus {
    pub fn is_passed(self) -> bool {
        matches!(
            self,
            SensorStatus::BumpPassed | SensorStatus::ZeroPassed | SensorStatus::SpanPassed
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            SensorStatus::BumpFailed
                | SensorStatus::O2HighBumpFailed
                | SensorStatus::ZeroFailed
                | SensorStatus::SpanFailed
                | SensorStatus::GasExpired
                | SensorStatus::GasUnavailable
        )
    }
}

/// What a gas delivery was used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasUsage {
    Precondition,
    Bump,
    BumpHigh,
    Calibration,
    Zero,
    Purge,
}

/// One entry of the gas usage ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedGasEndPoint {
    pub end_point: EndPointKey,
    pub usage: GasUsage,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Pass the delivery belonged to; zero for deliveries outside a pass.
    pub pass: usize,
}

impl UsedGasEndPoint {
    pub fn new(end_point: EndPointKey, usage: GasUsage, duration: Duration, pass: usize) -> Self {
        Self {
            end_point,
            usage,
            duration,
            pass,
        }
    }
}

/// Result artifact for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorGasResponse {
    pub position: u8,
    pub serial: String,
    pub gas: GasCode,
    /// Concentration actually applied, in the sensor's unit.
    pub gas_concentration: f64,
    /// Last in-range reading, in the sensor's unit.
    pub reading: f64,
    pub status: SensorStatus,
    /// Time from gas on to the passing reading (or to the end of the pass).
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(with = "humantime_serde")]
    pub cumulative_response_time: Duration,
    pub used_end_points: Vec<UsedGasEndPoint>,
    pub time_zero_started: Option<DateTime<Utc>>,
    pub time_zero_finished: Option<DateTime<Utc>>,
    pub time_precondition_started: Option<DateTime<Utc>>,
    pub time_precondition_finished: Option<DateTime<Utc>>,
    pub time_purge_started: Option<DateTime<Utc>>,
    pub time_purge_finished: Option<DateTime<Utc>>,
}

impl SensorGasResponse {
    pub fn new(position: u8, serial: impl Into<String>, gas: GasCode) -> Self {
        Self {
            position,
            serial: serial.into(),
            gas,
            gas_concentration: 0.0,
            reading: 0.0,
            status: SensorStatus::Skipped,
            duration: Duration::ZERO,
            cumulative_response_time: Duration::ZERO,
            used_end_points: Vec::new(),
            time_zero_started: None,
            time_zero_finished: None,
            time_precondition_started: None,
            time_precondition_finished: None,
            time_purge_started: None,
            time_purge_finished: None,
        }
    }

    /// Appends to the usage ledger.
    pub fn record_usage(&mut self, used: UsedGasEndPoint) {
        self.used_end_points.push(used);
    }

    pub fn usage_of(&self, usage: GasUsage) -> impl Iterator<Item = &UsedGasEndPoint> {
        self.used_end_points.iter().filter(move |u| u.usage == usage)
    }
}

/// Which operation produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    BumpTest,
    Calibration,
}

/// Outcome of a completed bump test or calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasOperationResult {
    pub kind: OperationKind,
    pub instrument_serial: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub responses: Vec<SensorGasResponse>,
    #[serde(with = "humantime_serde")]
    pub cumulative_response_time: Duration,
    /// End points found empty during the operation.
    pub emptied_end_points: Vec<EndPointKey>,
}

impl GasOperationResult {
    pub fn response(&self, position: u8) -> Option<&SensorGasResponse> {
        self.responses.iter().find(|r| r.position == position)
    }

    /// `true` when every evaluated sensor passed.
    pub fn passed(&self) -> bool {
        self.responses
            .iter()
            .filter(|r| r.status != SensorStatus::Skipped)
            .all(|r| r.status.is_passed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_is_filtered_by_usage() {
        let mut response = SensorGasResponse::new(1, "SN1", GasCode::CarbonMonoxide);
        let key = EndPointKey {
            position: 2,
            factory_id: "CO-100".into(),
        };
        response.record_usage(UsedGasEndPoint::new(
            key.clone(),
            GasUsage::Precondition,
            Duration::from_secs(5),
            1,
        ));
        response.record_usage(UsedGasEndPoint::new(key, GasUsage::Bump, Duration::from_secs(12), 1));
        assert_eq!(response.usage_of(GasUsage::Bump).count(), 1);
        assert_eq!(response.used_end_points.len(), 2);
    }

    #[test]
    fn skipped_sensors_do_not_fail_result() {
        let mut passed = SensorGasResponse::new(1, "SN1", GasCode::CarbonMonoxide);
        passed.status = SensorStatus::BumpPassed;
        let skipped = SensorGasResponse::new(2, "SN2", GasCode::HydrogenSulfide);
        let result = GasOperationResult {
            kind: OperationKind::BumpTest,
            instrument_serial: "INST".into(),
            started: Utc::now(),
            finished: Utc::now(),
            responses: vec![passed, skipped],
            cumulative_response_time: Duration::ZERO,
            emptied_end_points: vec![],
        };
        assert!(result.passed());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SensorStatus::O2HighBumpFailed).unwrap();
        assert_eq!(json, "\"o2_high_bump_failed\"");
    }
}
