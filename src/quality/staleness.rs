//! Trailing-silence detection for sensor feeds.
//!
//! The series scan in the parent module can only see gaps between two
//! readings that both arrived. A feed that simply stopped transmitting has
//! no "next reading" to hang a flag on, so the check needs a clock: how
//! long has the newest reading been the newest?
//!
//! Callers inject `now` rather than reading the system clock, which keeps
//! the check deterministic under test and lets replay tooling evaluate
//! historical moments.

use chrono::{DateTime, Utc};

use crate::config::QualityConfig;
use crate::model::{AnomalyFlag, AnomalyKind, Reading};
use crate::quality::severity_from_exceedance;
use crate::stations::{SensorProfile, StationProfile};

/// True when the silence since `latest` exceeds the dropout threshold
/// (`gap_multiple` times the sensor's expected cadence). Exactly at the
/// threshold is still on time.
pub fn silence_exceeded_at(
    latest: DateTime<Utc>,
    expected_interval_minutes: u32,
    gap_multiple: f64,
    now: DateTime<Utc>,
) -> bool {
    let silence_secs = (now - latest).num_seconds() as f64;
    let expected_secs = f64::from(expected_interval_minutes) * 60.0;
    silence_secs > expected_secs * gap_multiple
}

/// Checks whether a series has gone silent: if the newest reading is older
/// than the dropout threshold, returns a DROPOUT flag anchored on that
/// reading. An empty series yields `None`; absence of any data is a
/// different condition from a feed that stopped.
pub fn trailing_dropout(
    series: &[Reading],
    station: &StationProfile,
    sensor: &SensorProfile,
    config: &QualityConfig,
    now: DateTime<Utc>,
) -> Option<AnomalyFlag> {
    let latest = series.last()?;
    if !silence_exceeded_at(
        latest.timestamp,
        sensor.expected_interval_minutes,
        config.gap_multiple,
        now,
    ) {
        return None;
    }

    let silence_secs = (now - latest.timestamp).num_seconds() as f64;
    let expected_secs = f64::from(sensor.expected_interval_minutes) * 60.0;
    let ratio = (silence_secs / expected_secs) / config.gap_multiple;
    Some(AnomalyFlag {
        station_id: station.station_id.clone(),
        sensor_id: sensor.sensor_id.clone(),
        timestamp: latest.timestamp,
        kind: AnomalyKind::Dropout,
        severity: severity_from_exceedance(ratio),
        observed_value: latest.value,
        detail: format!(
            "no data for {:.0} minutes, expected cadence {} minutes",
            silence_secs / 60.0,
            sensor.expected_interval_minutes
        ),
        detected_at: now,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
