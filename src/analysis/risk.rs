//! Composite drought risk scoring.
//!
//! Combines three independent signals into one weighted score in [0, 1]:
//! how fast the water table is falling, where the current level sits in
//! the station's historical distribution, and how much recharge the
//! aquifer has seen recently. Any signal can be missing; its weight is
//! redistributed across the ones that remain so a station with no weather
//! feed still gets an assessment. Only when every signal is missing does
//! scoring refuse.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::RiskConfig;
use crate::error::AnalyticsError;
use crate::model::{ContributingFactors, DroughtRiskAssessment, RiskLevel};

/// Raw signals feeding one assessment. The facade assembles these from the
/// trend analyzer, the level history, and the recharge estimator; each is
/// `None` when its upstream could not produce a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskInputs {
    /// Robust slope of the recent level trend, metres/day (negative is
    /// falling).
    pub slope_m_per_day: Option<f64>,
    /// Current level's percentile within the historical window, in [0, 1]
    /// (0 is the historic low).
    pub level_percentile: Option<f64>,
    /// Estimated recharge rate over the recent window, mm/day.
    pub recharge_mm_per_day: Option<f64>,
}

/// Fixed score-to-bucket mapping.
pub fn risk_level_for_score(score: f64) -> RiskLevel {
    if score < 0.2 {
        RiskLevel::None
    } else if score < 0.4 {
        RiskLevel::Low
    } else if score < 0.6 {
        RiskLevel::Moderate
    } else if score < 0.8 {
        RiskLevel::High
    } else {
        RiskLevel::Severe
    }
}

#[derive(Debug, Clone)]
pub struct DroughtRiskScorer {
    config: RiskConfig,
}

impl DroughtRiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Scores one station/sensor from whatever signals are available.
    /// Weights renormalize over the present signals; with none present the
    /// assessment degrades to an insufficient-data error rather than a
    /// fabricated score.
    pub fn assess(
        &self,
        station_id: &str,
        sensor_id: &str,
        inputs: &RiskInputs,
        now: DateTime<Utc>,
    ) -> Result<DroughtRiskAssessment, AnalyticsError> {
        let cfg = &self.config;

        let trend_component = inputs
            .slope_m_per_day
            .map(|slope| ((-slope) / cfg.slope_scale_m_per_day).clamp(0.0, 1.0));
        let level_component = inputs
            .level_percentile
            .map(|p| 1.0 - p.clamp(0.0, 1.0));
        let recharge_component = inputs
            .recharge_mm_per_day
            .map(|rate| (1.0 - rate / cfg.reference_recharge_mm_per_day).clamp(0.0, 1.0));

        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        for (component, weight) in [
            (trend_component, cfg.trend_weight),
            (level_component, cfg.level_weight),
            (recharge_component, cfg.recharge_weight),
        ] {
            if let Some(c) = component {
                weighted += c * weight;
                weight_sum += weight;
            }
        }
        if weight_sum <= 0.0 {
            return Err(AnalyticsError::InsufficientData {
                station_id: station_id.to_string(),
                sensor_id: sensor_id.to_string(),
                points_available: 0,
                points_required: 1,
                operation: "drought risk assessment",
            });
        }

        let score = (weighted / weight_sum).clamp(0.0, 1.0);
        let risk_level = risk_level_for_score(score);
        debug!(
            station_id,
            sensor_id,
            score,
            risk_level = ?risk_level,
            "drought risk assessed"
        );

        Ok(DroughtRiskAssessment {
            station_id: station_id.to_string(),
            sensor_id: sensor_id.to_string(),
            computed_at: now,
            risk_level,
            score,
            factors: ContributingFactors {
                trend_component,
                level_percentile: level_component,
                recharge_component,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
