//! Tunable parameters for every analytics component.
//!
//! Detection thresholds, training policy, risk weights, and recharge
//! parameters are configuration, not constants. Defaults match the
//! deployed values; a `gwmon.toml` at the working directory (or the path
//! in `GWMON_CONFIG`) overrides any subset of them. Loading never fails
//! open: a file that parses but violates a bound is rejected.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "gwmon.toml";

// ---------------------------------------------------------------------------
// Quality detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    /// Rolling window length (readings) for spike statistics.
    #[serde(default = "default_spike_window")]
    pub spike_window: usize,
    /// Deviation threshold in rolling standard deviations.
    #[serde(default = "default_spike_sigma")]
    pub spike_sigma: f64,
    /// Consecutive identical readings that constitute a flatline.
    #[serde(default = "default_flatline_run")]
    pub flatline_run: usize,
    /// Two values within this distance count as identical.
    #[serde(default = "default_flatline_tolerance")]
    pub flatline_tolerance: f64,
    /// A gap is a DROPOUT when it exceeds the sensor's expected interval
    /// by this multiple.
    #[serde(default = "default_gap_multiple")]
    pub gap_multiple: f64,
    /// Below this rolling sigma the spike test is skipped; a window with
    /// no variation cannot express a meaningful z-score.
    #[serde(default = "default_sigma_floor")]
    pub sigma_floor: f64,
}

fn default_spike_window() -> usize {
    10
}

fn default_spike_sigma() -> f64 {
    3.0
}

fn default_flatline_run() -> usize {
    5
}

fn default_flatline_tolerance() -> f64 {
    1e-6
}

fn default_gap_multiple() -> f64 {
    3.0
}

fn default_sigma_floor() -> f64 {
    1e-9
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            spike_window: default_spike_window(),
            spike_sigma: default_spike_sigma(),
            flatline_run: default_flatline_run(),
            flatline_tolerance: default_flatline_tolerance(),
            gap_multiple: default_gap_multiple(),
            sigma_floor: default_sigma_floor(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trend analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TrendConfig {
    /// Hard floor: below this many quality-passing points the analyzer
    /// reports no slope and zero confidence.
    #[serde(default = "default_trend_min_points")]
    pub min_points: usize,
    /// Dominant period checked for seasonality.
    #[serde(default = "default_seasonal_lag_hours")]
    pub seasonal_lag_hours: f64,
    /// Minimum lag pairs before a seasonality estimate is reported.
    #[serde(default = "default_min_seasonal_pairs")]
    pub min_seasonal_pairs: usize,
    /// Above this many points the Theil-Sen estimator subsamples with a
    /// deterministic stride to keep request cost bounded.
    #[serde(default = "default_max_pair_points")]
    pub max_pair_points: usize,
}

fn default_trend_min_points() -> usize {
    10
}

fn default_seasonal_lag_hours() -> f64 {
    24.0
}

fn default_min_seasonal_pairs() -> usize {
    8
}

fn default_max_pair_points() -> usize {
    200
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_points: default_trend_min_points(),
            seasonal_lag_hours: default_seasonal_lag_hours(),
            min_seasonal_pairs: default_min_seasonal_pairs(),
            max_pair_points: default_max_pair_points(),
        }
    }
}

// ---------------------------------------------------------------------------
// Forecasting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    /// Minimum quality-passing points to train at all.
    #[serde(default = "default_min_training_points")]
    pub min_training_points: usize,
    /// Hard cap on requested horizons, in days.
    #[serde(default = "default_max_horizon_days")]
    pub max_horizon_days: u32,
    /// Model age beyond which it is STALE and retrained on next use.
    #[serde(default = "default_retrain_after_days")]
    pub retrain_after_days: f64,
    /// History window fetched for training.
    #[serde(default = "default_training_window_days")]
    pub training_window_days: u32,
    /// Chronological tail fraction held out for train-time metrics.
    #[serde(default = "default_holdout_fraction")]
    pub holdout_fraction: f64,
    /// Months need at least this many residuals to earn a seasonal index.
    #[serde(default = "default_min_seasonal_samples")]
    pub min_seasonal_samples: usize,
    /// Per-day damping applied to trend extrapolation; 1.0 disables.
    #[serde(default = "default_trend_damping")]
    pub trend_damping: f64,
    /// z multiplier for the interval (1.96 ≈ 95 %).
    #[serde(default = "default_confidence_z")]
    pub confidence_z: f64,
    /// Fractional interval growth per day of horizon.
    #[serde(default = "default_ci_widening_per_day")]
    pub ci_widening_per_day: f64,
    /// Absolute error treated as "within tolerance" for accuracy metrics.
    #[serde(default = "default_accuracy_tolerance_m")]
    pub accuracy_tolerance_m: f64,
    /// Below this within-tolerance fraction the model is marked degraded.
    #[serde(default = "default_min_holdout_accuracy")]
    pub min_holdout_accuracy: f64,
}

fn default_min_training_points() -> usize {
    30
}

fn default_max_horizon_days() -> u32 {
    30
}

fn default_retrain_after_days() -> f64 {
    7.0
}

fn default_training_window_days() -> u32 {
    180
}

fn default_holdout_fraction() -> f64 {
    0.2
}

fn default_min_seasonal_samples() -> usize {
    5
}

fn default_trend_damping() -> f64 {
    0.98
}

fn default_confidence_z() -> f64 {
    1.96
}

fn default_ci_widening_per_day() -> f64 {
    0.05
}

fn default_accuracy_tolerance_m() -> f64 {
    0.5
}

fn default_min_holdout_accuracy() -> f64 {
    0.6
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_training_points: default_min_training_points(),
            max_horizon_days: default_max_horizon_days(),
            retrain_after_days: default_retrain_after_days(),
            training_window_days: default_training_window_days(),
            holdout_fraction: default_holdout_fraction(),
            min_seasonal_samples: default_min_seasonal_samples(),
            trend_damping: default_trend_damping(),
            confidence_z: default_confidence_z(),
            ci_widening_per_day: default_ci_widening_per_day(),
            accuracy_tolerance_m: default_accuracy_tolerance_m(),
            min_holdout_accuracy: default_min_holdout_accuracy(),
        }
    }
}

// ---------------------------------------------------------------------------
// Drought risk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_trend_weight")]
    pub trend_weight: f64,
    #[serde(default = "default_level_weight")]
    pub level_weight: f64,
    #[serde(default = "default_recharge_weight")]
    pub recharge_weight: f64,
    /// Decline rate (m/day) that saturates the trend component at 1.0.
    #[serde(default = "default_slope_scale_m_per_day")]
    pub slope_scale_m_per_day: f64,
    /// Recharge rate (mm/day) considered healthy; lower rates raise risk.
    #[serde(default = "default_reference_recharge_mm_per_day")]
    pub reference_recharge_mm_per_day: f64,
    /// Window for the trend signal feeding the score.
    #[serde(default = "default_risk_trend_window_days")]
    pub trend_window_days: u32,
    /// Window defining "full historical distribution" for the percentile.
    #[serde(default = "default_risk_history_window_days")]
    pub history_window_days: u32,
    /// Window for the recharge signal feeding the score.
    #[serde(default = "default_risk_recharge_window_days")]
    pub recharge_window_days: u32,
}

fn default_trend_weight() -> f64 {
    0.3
}

fn default_level_weight() -> f64 {
    0.4
}

fn default_recharge_weight() -> f64 {
    0.3
}

fn default_slope_scale_m_per_day() -> f64 {
    0.05
}

fn default_reference_recharge_mm_per_day() -> f64 {
    1.0
}

fn default_risk_trend_window_days() -> u32 {
    30
}

fn default_risk_history_window_days() -> u32 {
    365
}

fn default_risk_recharge_window_days() -> u32 {
    30
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            trend_weight: default_trend_weight(),
            level_weight: default_level_weight(),
            recharge_weight: default_recharge_weight(),
            slope_scale_m_per_day: default_slope_scale_m_per_day(),
            reference_recharge_mm_per_day: default_reference_recharge_mm_per_day(),
            trend_window_days: default_risk_trend_window_days(),
            history_window_days: default_risk_history_window_days(),
            recharge_window_days: default_risk_recharge_window_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// Recharge estimation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RechargeConfig {
    #[serde(default = "default_min_period_days")]
    pub min_period_days: u32,
    #[serde(default = "default_max_period_days")]
    pub max_period_days: u32,
    /// Sub-window length for Δlevel estimates (and the uncertainty band).
    #[serde(default = "default_sub_window_days")]
    pub sub_window_days: u32,
    /// A sub-window must see at least this much rain for its rise to be
    /// attributed to recharge (rainfall-adjusted mode only).
    #[serde(default = "default_rain_event_threshold_mm")]
    pub rain_event_threshold_mm: f64,
    /// Uncertainty multiplier when no rainfall data is available.
    #[serde(default = "default_level_only_uncertainty_factor")]
    pub level_only_uncertainty_factor: f64,
}

fn default_min_period_days() -> u32 {
    7
}

fn default_max_period_days() -> u32 {
    365
}

fn default_sub_window_days() -> u32 {
    7
}

fn default_rain_event_threshold_mm() -> f64 {
    2.0
}

fn default_level_only_uncertainty_factor() -> f64 {
    1.5
}

impl Default for RechargeConfig {
    fn default() -> Self {
        Self {
            min_period_days: default_min_period_days(),
            max_period_days: default_max_period_days(),
            sub_window_days: default_sub_window_days(),
            rain_event_threshold_mm: default_rain_event_threshold_mm(),
            level_only_uncertainty_factor: default_level_only_uncertainty_factor(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub recharge: RechargeConfig,
}

impl AnalyticsConfig {
    /// Load configuration with the standard precedence: `GWMON_CONFIG`
    /// path, then `./gwmon.toml`, then built-in defaults. `.env` is
    /// consulted first so the path override can live there.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        if let Ok(path) = std::env::var("GWMON_CONFIG") {
            debug!(path = %path, "loading config from GWMON_CONFIG");
            return Self::from_path(&path);
        }

        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            return Self::from_path(DEFAULT_CONFIG_PATH);
        }

        info!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            source: e,
        })?;
        let config = Self::from_toml_str(&raw, path)?;
        info!(path = %path, "loaded analytics configuration");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that would make a component misbehave
    /// silently. Called on every load path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = &self.quality;
        if q.spike_window < 2 {
            return Err(ConfigError::Invalid(
                "quality.spike_window must be at least 2".to_string(),
            ));
        }
        if q.spike_sigma <= 0.0 {
            return Err(ConfigError::Invalid(
                "quality.spike_sigma must be positive".to_string(),
            ));
        }
        if q.flatline_run < 2 {
            return Err(ConfigError::Invalid(
                "quality.flatline_run must be at least 2".to_string(),
            ));
        }
        if q.gap_multiple <= 1.0 {
            return Err(ConfigError::Invalid(
                "quality.gap_multiple must exceed 1.0; a multiple at or below the \
                 expected interval flags every reading"
                    .to_string(),
            ));
        }

        if self.trend.min_points < 2 {
            return Err(ConfigError::Invalid(
                "trend.min_points must be at least 2".to_string(),
            ));
        }
        if self.trend.seasonal_lag_hours <= 0.0 {
            return Err(ConfigError::Invalid(
                "trend.seasonal_lag_hours must be positive".to_string(),
            ));
        }

        let f = &self.forecast;
        if f.min_training_points < 2 {
            return Err(ConfigError::Invalid(
                "forecast.min_training_points must be at least 2".to_string(),
            ));
        }
        if f.max_horizon_days == 0 {
            return Err(ConfigError::Invalid(
                "forecast.max_horizon_days must be at least 1".to_string(),
            ));
        }
        if f.retrain_after_days <= 0.0 {
            return Err(ConfigError::Invalid(
                "forecast.retrain_after_days must be positive".to_string(),
            ));
        }
        if !(f.holdout_fraction > 0.0 && f.holdout_fraction < 1.0) {
            return Err(ConfigError::Invalid(
                "forecast.holdout_fraction must be in (0, 1)".to_string(),
            ));
        }
        if !(f.trend_damping > 0.0 && f.trend_damping <= 1.0) {
            return Err(ConfigError::Invalid(
                "forecast.trend_damping must be in (0, 1]".to_string(),
            ));
        }
        if f.ci_widening_per_day < 0.0 {
            return Err(ConfigError::Invalid(
                "forecast.ci_widening_per_day must be non-negative; a negative value \
                 would narrow the interval with horizon"
                    .to_string(),
            ));
        }
        if f.accuracy_tolerance_m <= 0.0 {
            return Err(ConfigError::Invalid(
                "forecast.accuracy_tolerance_m must be positive".to_string(),
            ));
        }
        if !(f.min_holdout_accuracy > 0.0 && f.min_holdout_accuracy <= 1.0) {
            return Err(ConfigError::Invalid(
                "forecast.min_holdout_accuracy must be in (0, 1]".to_string(),
            ));
        }

        let r = &self.risk;
        if r.trend_weight < 0.0 || r.level_weight < 0.0 || r.recharge_weight < 0.0 {
            return Err(ConfigError::Invalid(
                "risk weights must be non-negative".to_string(),
            ));
        }
        if r.trend_weight + r.level_weight + r.recharge_weight <= 0.0 {
            return Err(ConfigError::Invalid(
                "risk weights must not all be zero".to_string(),
            ));
        }
        if r.slope_scale_m_per_day <= 0.0 {
            return Err(ConfigError::Invalid(
                "risk.slope_scale_m_per_day must be positive".to_string(),
            ));
        }
        if r.reference_recharge_mm_per_day <= 0.0 {
            return Err(ConfigError::Invalid(
                "risk.reference_recharge_mm_per_day must be positive".to_string(),
            ));
        }

        let rc = &self.recharge;
        if rc.min_period_days == 0 || rc.min_period_days > rc.max_period_days {
            return Err(ConfigError::Invalid(
                "recharge period bounds must satisfy 0 < min <= max".to_string(),
            ));
        }
        if rc.sub_window_days == 0 {
            return Err(ConfigError::Invalid(
                "recharge.sub_window_days must be at least 1".to_string(),
            ));
        }
        if rc.level_only_uncertainty_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "recharge.level_only_uncertainty_factor must be at least 1.0; \
                 losing the rainfall signal cannot shrink uncertainty"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
