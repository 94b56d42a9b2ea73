//! Core data types for the groundwater analytics engine.
//!
//! This module defines the shared domain model imported by all other modules.
//! It contains no algorithms and no I/O, only types, their serde derives for
//! the JSON boundary, and a couple of Display impls.
//!
//! Water levels are elevations in metres above mean sea level (masl). The
//! physical band a level sensor can legally report is bounded below by the
//! well bottom and above by ground elevation (see `stations`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire conventions
// ---------------------------------------------------------------------------

/// Sentinel used by DWLR telemetry exports for a transmitted-but-empty
/// sample. The reading adapter maps it to `value: None` before anything
/// downstream sees it.
pub const MISSING_VALUE_SENTINEL: f64 = -999_999.0;

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Validation state of a single reading. `Provisional` on arrival,
/// `Approved` after manual review upstream. Only the quality detector
/// amends a flag, and only to `Suspect` or `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityFlag {
    Provisional,
    Approved,
    Suspect,
    Rejected,
}

/// A single telemetered sample from a station sensor.
///
/// Immutable once ingested apart from `quality_flag`. Within a
/// (station_id, sensor_id) series readings are ordered by ascending
/// timestamp, but spacing is not guaranteed to be even: transmission
/// gaps and duplicate pushes happen routinely in the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub station_id: String,
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    /// `None` models a sample slot the recorder transmitted without a
    /// usable value (sentinel-mapped by the adapter).
    pub value: Option<f64>,
    pub unit: String,
    pub quality_flag: QualityFlag,
}

/// A rainfall observation from the weather collaborator, in millimetres
/// accumulated over the observation's native interval (daily for the
/// NASA POWER source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RainfallObservation {
    pub timestamp: DateTime<Utc>,
    pub rainfall_mm: f64,
}

/// Identifies one sensor series. Hash key for the model registry and the
/// in-memory stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorKey {
    pub station_id: String,
    pub sensor_id: String,
}

impl SensorKey {
    pub fn new(station_id: impl Into<String>, sensor_id: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            sensor_id: sensor_id.into(),
        }
    }
}

impl std::fmt::Display for SensorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.station_id, self.sensor_id)
    }
}

// ---------------------------------------------------------------------------
// Anomaly flags
// ---------------------------------------------------------------------------

/// What the quality detector found wrong with a reading (or a gap between
/// readings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    Spike,
    Flatline,
    Dropout,
    OutOfRange,
}

/// Severity levels, declared in ascending order so the derived `Ord`
/// matches operational urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A quality finding attached to one reading (identified by its series and
/// timestamp). Derived data: never written back onto the raw series beyond
/// the reading's `quality_flag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub station_id: String,
    pub sensor_id: String,
    /// Timestamp of the flagged reading (for a trailing DROPOUT, of the
    /// last reading heard from).
    pub timestamp: DateTime<Utc>,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub observed_value: Option<f64>,
    /// Human-readable cause, rendered as-is by the API layer.
    pub detail: String,
    pub detected_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Trend
// ---------------------------------------------------------------------------

/// Statistical trend summary over a request window. Recomputed per request;
/// cheap relative to forecasting, so never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub station_id: String,
    pub sensor_id: String,
    pub period_days: u32,
    /// Robust slope in metres/day. `None` when too few quality-passing
    /// points exist for an estimate worth reporting.
    pub slope_m_per_day: Option<f64>,
    /// Autocorrelation-derived strength of the dominant periodic component,
    /// in [0, 1].
    pub seasonality_strength: f64,
    /// Sample-density confidence in [0, 1]. Hard-floored to 0 below the
    /// minimum point count.
    pub confidence: f64,
    pub sample_count: usize,
}

// ---------------------------------------------------------------------------
// Forecast results
// ---------------------------------------------------------------------------

/// One predicted level with its interval bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub predicted_level_m: f64,
    pub lower_m: f64,
    pub upper_m: f64,
}

/// A forecast as returned to the caller. Ephemeral, recomputed per
/// request from the current model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub station_id: String,
    pub sensor_id: String,
    pub horizon_days: u32,
    pub generated_at: DateTime<Utc>,
    pub model_version: u32,
    pub points: Vec<ForecastPoint>,
    /// Nominal coverage of the per-point interval (e.g. 0.95).
    pub confidence_level: f64,
}

// ---------------------------------------------------------------------------
// Drought risk
// ---------------------------------------------------------------------------

/// Risk buckets in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    None,
    Low,
    Moderate,
    High,
    Severe,
}

/// The normalized risk contribution of each signal, before weighting.
/// `None` means the signal was unavailable and its weight was
/// redistributed, not that it contributed zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactors {
    pub trend_component: Option<f64>,
    pub level_percentile: Option<f64>,
    pub recharge_component: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroughtRiskAssessment {
    pub station_id: String,
    pub sensor_id: String,
    pub computed_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    /// Weighted combination of the available factors, in [0, 1].
    pub score: f64,
    pub factors: ContributingFactors,
}

// ---------------------------------------------------------------------------
// Recharge
// ---------------------------------------------------------------------------

/// Which variant of the water-table-fluctuation method produced an
/// estimate. `LevelOnly` means the weather collaborator was unavailable
/// and rainfall gating was skipped (wider uncertainty).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RechargeMethod {
    RainfallAdjusted,
    LevelOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RechargeEstimate {
    pub station_id: String,
    pub period_days: u32,
    pub volume_m3: f64,
    /// Equivalent recharge depth over the station's influence area.
    pub depth_m: f64,
    pub method: RechargeMethod,
    /// One-sigma band derived from the spread of sub-window estimates,
    /// in cubic metres. Never zero-width pretending to be exact.
    pub uncertainty_m3: f64,
    pub sub_window_count: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_is_ascending() {
        // Severity filters rely on the derived Ord following declaration
        // order. Reordering the variants would silently invert filters.
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn test_risk_level_ordering_is_ascending() {
        assert!(RiskLevel::None < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Severe);
    }

    #[test]
    fn test_anomaly_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&AnomalyKind::OutOfRange).unwrap();
        assert_eq!(json, "\"OUT_OF_RANGE\"", "wire format is the upstream API's spelling");
        let json = serde_json::to_string(&AnomalyKind::Spike).unwrap();
        assert_eq!(json, "\"SPIKE\"");
    }

    #[test]
    fn test_sensor_key_display_joins_with_slash() {
        let key = SensorKey::new("BLR001", "wl-01");
        assert_eq!(key.to_string(), "BLR001/wl-01");
    }

    #[test]
    fn test_reading_roundtrips_through_json() {
        let reading = Reading {
            station_id: "BLR001".to_string(),
            sensor_id: "wl-01".to_string(),
            timestamp: Utc::now(),
            value: Some(898.42),
            unit: "m".to_string(),
            quality_flag: QualityFlag::Provisional,
        };
        let json = serde_json::to_string(&reading).unwrap();
        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn test_missing_value_survives_serialization_as_null() {
        let reading = Reading {
            station_id: "BLR001".to_string(),
            sensor_id: "wl-01".to_string(),
            timestamp: Utc::now(),
            value: None,
            unit: "m".to_string(),
            quality_flag: QualityFlag::Provisional,
        };
        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"value\":null"));
    }
}
