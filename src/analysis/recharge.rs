//! Groundwater recharge estimation by water-table fluctuation.
//!
//! The classic WTF method: a rise in well level times specific yield is
//! the depth of water that entered storage. The request period is split
//! into sub-windows; each sub-window's net rise contributes, and when a
//! rainfall series is available a rise only counts if enough rain fell in
//! that sub-window to plausibly cause it. Without rainfall the estimate
//! still works, it just cannot rule out non-recharge rises, so the
//! uncertainty band widens instead.
//!
//! Sub-window spread doubles as the uncertainty estimate: windows that
//! disagree wildly produce a wide band around the summed total.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::analysis::stats;
use crate::config::RechargeConfig;
use crate::error::AnalyticsError;
use crate::model::{RainfallObservation, Reading, RechargeEstimate, RechargeMethod};
use crate::stations::{SensorProfile, StationProfile};

// Pressure-transducer noise floor on a single head difference, metres.
// Keeps the reported band nonzero even when every sub-window agrees.
const HEAD_NOISE_FLOOR_M: f64 = 0.005;

#[derive(Debug, Clone)]
pub struct RechargeEstimator {
    config: RechargeConfig,
}

impl RechargeEstimator {
    pub fn new(config: RechargeConfig) -> Self {
        Self { config }
    }

    /// Estimates recharge over the `period_days` ending at `period_end`.
    ///
    /// `series` is the quality-passing level record for the period,
    /// ascending. `rainfall` gates which rises count; `None` (or an empty
    /// series) degrades to level-only mode with a widened band. Fewer than
    /// two populated sub-windows cannot support an estimate.
    pub fn estimate(
        &self,
        station: &StationProfile,
        sensor: &SensorProfile,
        series: &[Reading],
        rainfall: Option<&[RainfallObservation]>,
        period_days: u32,
        period_end: DateTime<Utc>,
    ) -> Result<RechargeEstimate, AnalyticsError> {
        let cfg = &self.config;
        if period_days < cfg.min_period_days || period_days > cfg.max_period_days {
            return Err(AnalyticsError::Validation {
                field: "period_days",
                message: format!(
                    "must be between {} and {} days, got {}",
                    cfg.min_period_days, cfg.max_period_days, period_days
                ),
            });
        }
        let rainfall = rainfall.filter(|r| !r.is_empty());

        let period_start = period_end - Duration::days(i64::from(period_days));
        let sub_days = i64::from(cfg.sub_window_days.max(1));
        let specific_yield = station.effective_specific_yield();

        // Recharge depth contributed by each populated sub-window, metres.
        let mut contributions: Vec<f64> = Vec::new();
        let mut window_start = period_start;
        while window_start < period_end {
            let window_end = (window_start + Duration::days(sub_days)).min(period_end);
            let levels: Vec<f64> = series
                .iter()
                .filter(|r| r.timestamp >= window_start && r.timestamp < window_end)
                .filter_map(|r| r.value.filter(|v| v.is_finite()))
                .collect();
            if levels.len() >= 2 {
                let rise = (levels[levels.len() - 1] - levels[0]).max(0.0);
                let counted = match rainfall {
                    Some(observations) => {
                        let rain_mm: f64 = observations
                            .iter()
                            .filter(|o| o.timestamp >= window_start && o.timestamp < window_end)
                            .map(|o| o.rainfall_mm)
                            .sum();
                        if rain_mm >= cfg.rain_event_threshold_mm {
                            rise
                        } else {
                            0.0
                        }
                    }
                    None => rise,
                };
                contributions.push(specific_yield * counted);
            }
            window_start = window_end;
        }

        if contributions.len() < 2 {
            return Err(AnalyticsError::InsufficientData {
                station_id: station.station_id.clone(),
                sensor_id: sensor.sensor_id.clone(),
                points_available: contributions.len(),
                points_required: 2,
                operation: "recharge estimation",
            });
        }

        let depth_m: f64 = contributions.iter().sum();
        let method = if rainfall.is_some() {
            RechargeMethod::RainfallAdjusted
        } else {
            RechargeMethod::LevelOnly
        };

        // One-sigma spread of the sub-window contributions, scaled to
        // their sum, floored at a tenth of the estimate and at instrument
        // noise.
        let spread = stats::std_dev(&contributions).unwrap_or(0.0)
            * (contributions.len() as f64).sqrt();
        let mut uncertainty_depth = spread
            .max(0.1 * depth_m)
            .max(specific_yield * HEAD_NOISE_FLOOR_M);
        if method == RechargeMethod::LevelOnly {
            uncertainty_depth *= cfg.level_only_uncertainty_factor;
        }

        let area = station.influence_area_m2;
        debug!(
            station_id = %station.station_id,
            period_days,
            depth_m,
            method = ?method,
            sub_windows = contributions.len(),
            "recharge estimated"
        );
        Ok(RechargeEstimate {
            station_id: station.station_id.clone(),
            period_days,
            volume_m3: depth_m * area,
            depth_m,
            method,
            uncertainty_m3: uncertainty_depth * area,
            sub_window_count: contributions.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QualityFlag;
    use crate::stations::StationRegistry;
    use chrono::TimeZone;

    fn period_end() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn reading(ts: DateTime<Utc>, value: f64) -> Reading {
        Reading {
            station_id: "BLR001".to_string(),
            sensor_id: "wl-01".to_string(),
            timestamp: ts,
            value: Some(value),
            unit: "m".to_string(),
            quality_flag: QualityFlag::Approved,
        }
    }

    /// Two readings per 7-day sub-window (an hour inside each edge), with
    /// the given (start, end) levels per window. The period runs
    /// `windows.len() * 7` days back from `period_end`.
    fn windowed_series(windows: &[(f64, f64)]) -> Vec<Reading> {
        let period_start = period_end() - Duration::days(7 * windows.len() as i64);
        windows
            .iter()
            .enumerate()
            .flat_map(|(i, (start_level, end_level))| {
                let w_start = period_start + Duration::days(7 * i as i64);
                vec![
                    reading(w_start + Duration::hours(1), *start_level),
                    reading(w_start + Duration::days(7) - Duration::hours(1), *end_level),
                ]
            })
            .collect()
    }

    /// One rainfall observation in the middle of the i-th sub-window.
    fn rain_in_window(amounts_mm: &[f64]) -> Vec<RainfallObservation> {
        let period_start = period_end() - Duration::days(7 * amounts_mm.len() as i64);
        amounts_mm
            .iter()
            .enumerate()
            .map(|(i, mm)| RainfallObservation {
                timestamp: period_start + Duration::days(7 * i as i64) + Duration::days(3),
                rainfall_mm: *mm,
            })
            .collect()
    }

    fn estimate(
        series: &[Reading],
        rainfall: Option<&[RainfallObservation]>,
        period_days: u32,
    ) -> Result<RechargeEstimate, AnalyticsError> {
        let registry = StationRegistry::builtin();
        let station = registry.get("BLR001").unwrap();
        let sensor = station.sensor("wl-01").unwrap();
        RechargeEstimator::new(RechargeConfig::default()).estimate(
            station,
            sensor,
            series,
            rainfall,
            period_days,
            period_end(),
        )
    }

    #[test]
    fn test_rain_backed_rises_sum_into_recharge() {
        // Two windows rising 0.10 m and 0.05 m, both with rain above the
        // event threshold. Alluvial BLR001 has Sy 0.12 over 2.5 km²:
        // depth 0.018 m, volume 45 000 m³.
        let series = windowed_series(&[(898.00, 898.10), (898.10, 898.15)]);
        let rain = rain_in_window(&[5.0, 6.0]);
        let est = estimate(&series, Some(&rain), 14).unwrap();

        assert!((est.depth_m - 0.018).abs() < 1e-12, "got {}", est.depth_m);
        assert!((est.volume_m3 - 45_000.0).abs() < 1e-6, "got {}", est.volume_m3);
        assert_eq!(est.method, RechargeMethod::RainfallAdjusted);
        assert_eq!(est.sub_window_count, 2);
        // Contributions 0.012 and 0.006 m: σ·√2 = 0.006 m → 15 000 m³.
        assert!((est.uncertainty_m3 - 15_000.0).abs() < 1e-6, "got {}", est.uncertainty_m3);
    }

    #[test]
    fn test_dry_window_rise_is_not_attributed_to_recharge() {
        // The second window rises 0.20 m but saw only 0.5 mm of rain;
        // with rainfall known, that rise is excluded.
        let series = windowed_series(&[(898.00, 898.10), (898.10, 898.30)]);
        let rain = rain_in_window(&[5.0, 0.5]);
        let est = estimate(&series, Some(&rain), 14).unwrap();
        assert!((est.depth_m - 0.012).abs() < 1e-12, "got {}", est.depth_m);
        assert_eq!(est.sub_window_count, 2, "a gated window still counts as observed");
    }

    #[test]
    fn test_level_only_counts_all_rises_and_widens_the_band() {
        let series = windowed_series(&[(898.00, 898.10), (898.10, 898.30)]);
        let est = estimate(&series, None, 14).unwrap();

        // All rises count without gating: Sy × 0.30 m = 0.036 m.
        assert!((est.depth_m - 0.036).abs() < 1e-12, "got {}", est.depth_m);
        assert_eq!(est.method, RechargeMethod::LevelOnly);
        // Contributions 0.012 and 0.024: σ·√2 = 0.012 m, × 1.5 level-only
        // factor → 0.018 m over 2.5 km² is 45 000 m³.
        assert!((est.uncertainty_m3 - 45_000.0).abs() < 1e-6, "got {}", est.uncertainty_m3);
    }

    #[test]
    fn test_empty_rainfall_series_degrades_to_level_only() {
        let series = windowed_series(&[(898.00, 898.10), (898.10, 898.15)]);
        let est = estimate(&series, Some(&[]), 14).unwrap();
        assert_eq!(est.method, RechargeMethod::LevelOnly);
    }

    #[test]
    fn test_period_outside_bounds_is_a_validation_error() {
        let series = windowed_series(&[(898.0, 898.1), (898.1, 898.2)]);
        for bad_period in [3_u32, 400] {
            let err = estimate(&series, None, bad_period).unwrap_err();
            assert!(
                matches!(err, AnalyticsError::Validation { field: "period_days", .. }),
                "period {bad_period} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_single_populated_window_is_insufficient() {
        // 14-day period but all readings land in the first week.
        let mut series = windowed_series(&[(898.00, 898.10)]);
        let shift = Duration::days(7);
        for r in &mut series {
            r.timestamp = r.timestamp - shift;
        }
        let err = estimate(&series, None, 14).unwrap_err();
        assert!(
            matches!(err, AnalyticsError::InsufficientData { points_available: 1, .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn test_declining_levels_report_zero_with_honest_band() {
        let series = windowed_series(&[(898.30, 898.20), (898.20, 898.05)]);
        let est = estimate(&series, None, 14).unwrap();
        assert_eq!(est.volume_m3, 0.0);
        assert_eq!(est.depth_m, 0.0);
        assert!(
            est.uncertainty_m3 > 0.0,
            "a zero estimate still carries instrument-noise uncertainty"
        );
    }

    #[test]
    fn test_site_tested_specific_yield_overrides_aquifer_default() {
        // DEL001 carries a site-tested Sy of 0.15.
        let registry = StationRegistry::builtin();
        let station = registry.get("DEL001").unwrap();
        let sensor = station.first_level_sensor().unwrap();
        let series: Vec<Reading> = windowed_series(&[(200.00, 200.10), (200.10, 200.20)])
            .into_iter()
            .map(|r| Reading {
                station_id: "DEL001".to_string(),
                ..r
            })
            .collect();
        let est = RechargeEstimator::new(RechargeConfig::default())
            .estimate(station, sensor, &series, None, 14, period_end())
            .unwrap();
        assert!((est.depth_m - 0.15 * 0.20).abs() < 1e-12, "got {}", est.depth_m);
    }
}
