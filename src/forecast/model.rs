//! The level forecast model.
//!
//! Small and fully deterministic: a Theil-Sen trend line, a
//! monthly seasonal index built from detrended residuals, and a residual
//! sigma that sets the prediction interval. Trend extrapolation is damped
//! so a wet-season rise does not get projected linearly into absurdity a
//! month out. Everything the model needs to predict lives in
//! [`ModelParameters`], which serializes to JSON for the store.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::stats;
use crate::config::ForecastConfig;
use crate::error::AnalyticsError;
use crate::forecast::AccuracyMetrics;
use crate::model::{ForecastPoint, Reading, SensorKey};

// Theil-Sen pair cost is quadratic; long training windows get the same
// deterministic stride subsampling the trend analyzer uses.
const SLOPE_SUBSAMPLE_CAP: usize = 200;

// A fit can come out with near-zero residuals on clean data; the interval
// still has to admit instrument noise.
const MIN_RESIDUAL_SIGMA_M: f64 = 0.01;

/// Everything needed to reproduce a trained model's predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Time axis origin: timestamp of the first training point.
    pub origin: DateTime<Utc>,
    /// Robust level at the origin, metres.
    pub base_level_m: f64,
    /// Theil-Sen slope, metres/day.
    pub trend_m_per_day: f64,
    /// Days from origin to the last training point; extrapolation damping
    /// starts here.
    pub train_end_days: f64,
    /// Per-day damping factor on extrapolated trend; 1.0 disables.
    pub trend_damping: f64,
    /// Mean detrended residual by calendar month (index 0 is January).
    /// `None` for months the training window could not support.
    pub seasonal_by_month: [Option<f64>; 12],
    /// Residual sigma after trend and seasonal removal, metres.
    pub residual_sigma_m: f64,
    /// Interval multiplier, copied from config at train time so a stored
    /// model keeps predicting the same intervals under later config edits.
    pub confidence_z: f64,
    /// Fractional interval growth per day of horizon.
    pub ci_widening_per_day: f64,
}

impl ModelParameters {
    pub fn to_bytes(&self) -> Result<Vec<u8>, AnalyticsError> {
        serde_json::to_vec(self)
            .map_err(|e| AnalyticsError::Internal(format!("model parameters encode: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AnalyticsError> {
        serde_json::from_slice(bytes)
            .map_err(|e| AnalyticsError::Internal(format!("model parameters decode: {e}")))
    }
}

/// A fitted model ready to predict.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelModel {
    params: ModelParameters,
}

impl LevelModel {
    pub fn from_parameters(params: ModelParameters) -> Self {
        Self { params }
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.params
    }

    /// Fits on a quality-passing, ascending series. When the series is
    /// long enough to spare a chronological holdout tail, the head is
    /// fitted first and scored against the tail, then the returned model
    /// is refitted on the full series. Too few points refuses outright.
    pub fn fit(
        key: &SensorKey,
        series: &[Reading],
        config: &ForecastConfig,
    ) -> Result<(Self, Option<AccuracyMetrics>), AnalyticsError> {
        let usable: Vec<&Reading> = series
            .iter()
            .filter(|r| r.value.is_some_and(|v| v.is_finite()))
            .collect();
        if usable.len() < config.min_training_points {
            return Err(AnalyticsError::InsufficientData {
                station_id: key.station_id.clone(),
                sensor_id: key.sensor_id.clone(),
                points_available: usable.len(),
                points_required: config.min_training_points,
                operation: "model training",
            });
        }

        // Chronological split: the tail is the future relative to the
        // head, which is the only honest way to score a forecaster.
        let holdout_len =
            ((usable.len() as f64) * config.holdout_fraction).floor() as usize;
        let head_len = usable.len() - holdout_len;
        let holdout = if holdout_len >= 1 && head_len >= config.min_training_points {
            let head_model = Self {
                params: fit_parameters(&usable[..head_len], config),
            };
            head_model.evaluate_refs(&usable[head_len..], config.accuracy_tolerance_m)
        } else {
            None
        };

        let model = Self {
            params: fit_parameters(&usable, config),
        };
        Ok((model, holdout))
    }

    /// Level the model believes in at an arbitrary instant.
    pub fn predicted_level_at(&self, at: DateTime<Utc>) -> f64 {
        let p = &self.params;
        let t = days_between(p.origin, at);
        let seasonal = p.seasonal_by_month[at.month0() as usize].unwrap_or(0.0);
        p.base_level_m + p.trend_m_per_day * self.effective_trend_days(t) + seasonal
    }

    /// Daily forecast points for `1..=horizon_days` days after `from`,
    /// with intervals that widen strictly with the horizon.
    pub fn predict(&self, from: DateTime<Utc>, horizon_days: u32) -> Vec<ForecastPoint> {
        let p = &self.params;
        (1..=i64::from(horizon_days))
            .map(|h| {
                let timestamp = from + Duration::days(h);
                let predicted = self.predicted_level_at(timestamp);
                let half_width = p.confidence_z
                    * p.residual_sigma_m
                    * (1.0 + p.ci_widening_per_day * h as f64);
                ForecastPoint {
                    timestamp,
                    predicted_level_m: predicted,
                    lower_m: predicted - half_width,
                    upper_m: predicted + half_width,
                }
            })
            .collect()
    }

    /// Scores this model against observed readings. `None` when nothing
    /// in the series is usable.
    pub fn evaluate(&self, series: &[Reading], tolerance_m: f64) -> Option<AccuracyMetrics> {
        let refs: Vec<&Reading> = series.iter().collect();
        self.evaluate_refs(&refs, tolerance_m)
    }

    fn evaluate_refs(&self, series: &[&Reading], tolerance_m: f64) -> Option<AccuracyMetrics> {
        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        let mut within = 0usize;
        let mut n = 0usize;
        for reading in series {
            let Some(observed) = reading.value.filter(|v| v.is_finite()) else {
                continue;
            };
            let error = (self.predicted_level_at(reading.timestamp) - observed).abs();
            abs_sum += error;
            sq_sum += error * error;
            if error <= tolerance_m {
                within += 1;
            }
            n += 1;
        }
        if n == 0 {
            return None;
        }
        let nf = n as f64;
        Some(AccuracyMetrics {
            mean_absolute_error_m: abs_sum / nf,
            root_mean_square_error_m: (sq_sum / nf).sqrt(),
            within_tolerance: within as f64 / nf,
            evaluated_points: n,
        })
    }

    /// Trend-days actually applied at elapsed time `t`. Inside the
    /// training span the trend is linear; beyond it each further day
    /// contributes a geometrically shrinking share, capped at
    /// `damping / (1 - damping)` extra days.
    fn effective_trend_days(&self, t: f64) -> f64 {
        let p = &self.params;
        if t <= p.train_end_days {
            return t;
        }
        let beyond = t - p.train_end_days;
        if (1.0 - p.trend_damping).abs() < 1e-12 {
            return p.train_end_days + beyond;
        }
        let phi = p.trend_damping;
        p.train_end_days + phi * (1.0 - phi.powf(beyond)) / (1.0 - phi)
    }
}

/// Core fit over usable readings. Degenerate inputs (all timestamps
/// coincident) flatten to a zero-trend model rather than failing; the
/// caller has already enforced the point floor.
fn fit_parameters(usable: &[&Reading], config: &ForecastConfig) -> ModelParameters {
    let origin = usable[0].timestamp;
    let points: Vec<(f64, f64)> = usable
        .iter()
        .map(|r| {
            (
                days_between(origin, r.timestamp),
                r.value.unwrap_or_default(),
            )
        })
        .collect();

    let trend = stats::theil_sen_slope(&points, SLOPE_SUBSAMPLE_CAP).unwrap_or(0.0);
    let base = stats::robust_intercept(&points, trend).unwrap_or_default();

    // Detrended residuals, bucketed by calendar month.
    let mut month_sums = [0.0f64; 12];
    let mut month_counts = [0usize; 12];
    for (reading, (t, v)) in usable.iter().zip(points.iter()) {
        let residual = v - (base + trend * t);
        let m = reading.timestamp.month0() as usize;
        month_sums[m] += residual;
        month_counts[m] += 1;
    }
    let mut seasonal_by_month = [None; 12];
    for m in 0..12 {
        if month_counts[m] >= config.min_seasonal_samples {
            seasonal_by_month[m] = Some(month_sums[m] / month_counts[m] as f64);
        }
    }

    let adjusted: Vec<f64> = usable
        .iter()
        .zip(points.iter())
        .map(|(reading, (t, v))| {
            let seasonal =
                seasonal_by_month[reading.timestamp.month0() as usize].unwrap_or(0.0);
            v - (base + trend * t) - seasonal
        })
        .collect();
    let residual_sigma_m = stats::std_dev(&adjusted)
        .unwrap_or(0.0)
        .max(MIN_RESIDUAL_SIGMA_M);

    ModelParameters {
        origin,
        base_level_m: base,
        trend_m_per_day: trend,
        train_end_days: points.last().map(|p| p.0).unwrap_or_default(),
        trend_damping: config.trend_damping,
        seasonal_by_month,
        residual_sigma_m,
        confidence_z: config.confidence_z,
        ci_widening_per_day: config.ci_widening_per_day,
    }
}

fn days_between(origin: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    (at - origin).num_seconds() as f64 / 86_400.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
