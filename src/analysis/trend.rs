//! Robust trend and seasonality estimation for level series.
//!
//! Groundwater telemetry is noisy and irregularly gapped, so the slope
//! estimate uses the Theil-Sen median-of-pairwise-slopes estimator rather
//! than least squares; a handful of surviving spikes cannot drag it.
//! Seasonality is measured as autocorrelation of the detrended series at
//! the dominant period (daily by default), and confidence reports how
//! densely the request window is actually sampled rather than any claim
//! about the statistics themselves.

use tracing::debug;

use crate::analysis::stats;
use crate::config::TrendConfig;
use crate::model::{Reading, TrendSummary};
use crate::stations::{SensorProfile, StationProfile};

// Detrend residuals below this spread carry no measurable cycle.
const RESIDUAL_FLOOR_M: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    config: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    /// Summarizes a quality-passing series over a `period_days` request
    /// window. Below the minimum point count the summary carries no slope
    /// and zero confidence; a thin series is an answer here, not an error.
    pub fn analyze(
        &self,
        station: &StationProfile,
        sensor: &SensorProfile,
        series: &[Reading],
        period_days: u32,
    ) -> TrendSummary {
        let cfg = &self.config;

        // (days since first sample, value) for every usable reading.
        let mut points: Vec<(f64, f64)> = Vec::with_capacity(series.len());
        if let Some(first) = series.first() {
            for reading in series {
                if let Some(v) = reading.value {
                    if v.is_finite() {
                        let t = (reading.timestamp - first.timestamp).num_seconds() as f64
                            / 86_400.0;
                        points.push((t, v));
                    }
                }
            }
        }
        let sample_count = points.len();

        if sample_count < cfg.min_points {
            debug!(
                station_id = %station.station_id,
                sensor_id = %sensor.sensor_id,
                sample_count,
                min_points = cfg.min_points,
                "trend window below the point floor"
            );
            return TrendSummary {
                station_id: station.station_id.clone(),
                sensor_id: sensor.sensor_id.clone(),
                period_days,
                slope_m_per_day: None,
                seasonality_strength: 0.0,
                confidence: 0.0,
                sample_count,
            };
        }

        let slope = stats::theil_sen_slope(&points, cfg.max_pair_points);
        let seasonality_strength = self.seasonality_strength(&points, slope);
        let confidence = sample_density(sample_count, period_days, sensor);

        TrendSummary {
            station_id: station.station_id.clone(),
            sensor_id: sensor.sensor_id.clone(),
            period_days,
            slope_m_per_day: slope,
            seasonality_strength,
            confidence,
            sample_count,
        }
    }

    /// Autocorrelation of the detrended series at the configured lag, as a
    /// strength in [0, 1]. Pairs are matched by time, not index: each point
    /// is paired with the sample nearest to `t + lag`, and only if that
    /// partner lands within a tenth of the lag. Too few pairs, or no
    /// periodic structure, reads as 0.
    fn seasonality_strength(&self, points: &[(f64, f64)], slope: Option<f64>) -> f64 {
        let lag_days = self.config.seasonal_lag_hours / 24.0;
        if lag_days <= 0.0 {
            return 0.0;
        }
        let tolerance = lag_days * 0.1;

        // Remove the secular trend so a steady decline does not read as
        // seasonality.
        let detrended: Vec<(f64, f64)> = match slope {
            Some(m) => {
                let intercept = stats::robust_intercept(points, m).unwrap_or(0.0);
                points
                    .iter()
                    .map(|&(t, v)| (t, v - (intercept + m * t)))
                    .collect()
            }
            None => points.to_vec(),
        };

        // A residual band this thin is numerical noise from the detrend,
        // not a water-table cycle.
        let residuals: Vec<f64> = detrended.iter().map(|p| p.1).collect();
        match stats::std_dev(&residuals) {
            Some(sd) if sd > RESIDUAL_FLOOR_M => {}
            _ => return 0.0,
        }

        let mut heads = Vec::new();
        let mut tails = Vec::new();
        for &(t, v) in &detrended {
            let target = t + lag_days;
            if let Some(&(pt, pv)) = nearest_by_time(&detrended, target) {
                if (pt - target).abs() <= tolerance {
                    heads.push(v);
                    tails.push(pv);
                }
            }
        }
        if heads.len() < self.config.min_seasonal_pairs {
            return 0.0;
        }
        match stats::pearson(&heads, &tails) {
            Some(r) => r.clamp(0.0, 1.0),
            None => 0.0,
        }
    }
}

/// Fraction of the readings the sensor's cadence predicts for the window
/// that actually arrived, clamped to [0, 1].
fn sample_density(sample_count: usize, period_days: u32, sensor: &SensorProfile) -> f64 {
    let expected =
        f64::from(period_days) * 24.0 * 60.0 / f64::from(sensor.expected_interval_minutes);
    if expected <= 0.0 {
        return 0.0;
    }
    (sample_count as f64 / expected).clamp(0.0, 1.0)
}

/// Binary search for the sample whose time coordinate is closest to
/// `target`. Input must be ascending in time, which the reading stores
/// guarantee.
fn nearest_by_time(points: &[(f64, f64)], target: f64) -> Option<&(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let idx = points
        .partition_point(|&(t, _)| t < target)
        .min(points.len() - 1);
    let candidate = &points[idx];
    if idx == 0 {
        return Some(candidate);
    }
    let before = &points[idx - 1];
    if (before.0 - target).abs() <= (candidate.0 - target).abs() {
        Some(before)
    } else {
        Some(candidate)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
