//! Reading and rainfall acquisition.
//!
//! The analytics components never talk to a database or an HTTP API
//! directly; they consume two narrow traits. [`ReadingStore`] hands back
//! one sensor's series, already ascending and de-duplicated, with the
//! telemetry missing-value sentinel mapped to `None`. [`RainfallProvider`]
//! supplies daily precipitation for a station's coordinates and is always
//! optional: callers degrade gracefully when it fails.
//!
//! Submodules:
//! - `memory`: in-process stores for tests and embedded use;
//! - `postgres`: the telemetry warehouse reader;
//! - `power`: NASA POWER daily precipitation client.

pub mod memory;
pub mod postgres;
pub mod power;

pub use memory::{InMemoryRainfall, InMemoryReadingStore};
pub use postgres::PgReadingStore;
pub use power::NasaPowerClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AnalyticsError;
use crate::model::{RainfallObservation, Reading, SensorKey, MISSING_VALUE_SENTINEL};
use crate::stations::StationProfile;

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Readings for one sensor in `[start, end]`, ascending by timestamp
    /// with duplicates collapsed. Implementations run raw rows through
    /// [`normalize_series`] before returning.
    async fn read_series(
        &self,
        key: &SensorKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, AnalyticsError>;
}

#[async_trait]
pub trait RainfallProvider: Send + Sync {
    /// Daily rainfall at the station's coordinates in `[start, end]`,
    /// ascending.
    async fn rainfall(
        &self,
        station: &StationProfile,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RainfallObservation>, AnalyticsError>;
}

/// Canonical series shape: sentinel and non-finite values become `None`,
/// order is ascending, and when a timestamp was transmitted more than once
/// the last-ingested reading wins (field retransmissions supersede).
pub fn normalize_series(mut readings: Vec<Reading>) -> Vec<Reading> {
    for reading in &mut readings {
        if let Some(v) = reading.value {
            if !v.is_finite() || v == MISSING_VALUE_SENTINEL {
                reading.value = None;
            }
        }
    }
    // Stable sort keeps ingest order among equal timestamps; reversing
    // before dedup keeps the latest of each run.
    readings.sort_by_key(|r| r.timestamp);
    readings.reverse();
    readings.dedup_by(|a, b| a.timestamp == b.timestamp);
    readings.reverse();
    readings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QualityFlag;
    use chrono::{Duration, TimeZone, Timelike};

    fn reading(minute: i64, value: Option<f64>) -> Reading {
        Reading {
            station_id: "BLR001".to_string(),
            sensor_id: "wl-01".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minute),
            value,
            unit: "m".to_string(),
            quality_flag: QualityFlag::Provisional,
        }
    }

    #[test]
    fn test_normalize_sorts_ascending() {
        let series = normalize_series(vec![
            reading(30, Some(898.2)),
            reading(0, Some(898.0)),
            reading(15, Some(898.1)),
        ]);
        let minutes: Vec<i64> = series
            .iter()
            .map(|r| r.timestamp.minute() as i64)
            .collect();
        assert_eq!(minutes, vec![0, 15, 30]);
    }

    #[test]
    fn test_normalize_maps_sentinel_and_non_finite_to_none() {
        let series = normalize_series(vec![
            reading(0, Some(MISSING_VALUE_SENTINEL)),
            reading(15, Some(f64::NAN)),
            reading(30, Some(f64::INFINITY)),
            reading(45, Some(898.1)),
        ]);
        assert_eq!(series[0].value, None);
        assert_eq!(series[1].value, None);
        assert_eq!(series[2].value, None);
        assert_eq!(series[3].value, Some(898.1));
    }

    #[test]
    fn test_normalize_keeps_the_latest_retransmission() {
        let series = normalize_series(vec![
            reading(0, Some(898.0)),
            reading(0, Some(898.4)),
            reading(15, Some(898.1)),
        ]);
        assert_eq!(series.len(), 2);
        assert_eq!(
            series[0].value,
            Some(898.4),
            "the later-ingested duplicate supersedes"
        );
    }
}
