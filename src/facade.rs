//! Service surface consumed by the API layer.
//!
//! `AnalyticsService` is pure orchestration: every operation fetches the
//! reading window through the store adapter, runs the quality gate, and
//! hands quality-passing data to exactly one downstream component. No
//! domain math lives here.
//!
//! Collaborator policy: a failing reading store fails the request (there
//! is nothing to analyze), a failing weather collaborator degrades the
//! recharge path to level-only (the estimator widens its uncertainty
//! band accordingly).

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analysis::recharge::RechargeEstimator;
use crate::analysis::risk::{DroughtRiskScorer, RiskInputs};
use crate::analysis::stats;
use crate::analysis::trend::TrendAnalyzer;
use crate::config::AnalyticsConfig;
use crate::error::AnalyticsError;
use crate::forecast::{AccuracyMetrics, ForecastManager, ModelStatus, ModelStore};
use crate::ingest::{RainfallProvider, ReadingStore};
use crate::model::{
    AnomalyFlag, DroughtRiskAssessment, ForecastResult, RainfallObservation, RechargeEstimate,
    Reading, SensorKey, Severity, TrendSummary,
};
use crate::quality::{self, staleness, QualityDetector};
use crate::stations::{SensorKind, SensorProfile, StationProfile, StationRegistry};

/// Longest lookback accepted for trend analysis.
const MAX_TREND_PERIOD_DAYS: u32 = 365;
/// Longest lookback accepted for an anomaly scan.
const MAX_ANOMALY_WINDOW_DAYS: u32 = 365;
/// Longest trailing window accepted for accuracy assessment.
const MAX_ACCURACY_WINDOW_DAYS: u32 = 30;

/// Cheap-to-clone service handle; one per process is typical, clones
/// share every piece of state.
#[derive(Clone)]
pub struct AnalyticsService {
    config: AnalyticsConfig,
    stations: Arc<StationRegistry>,
    readings: Arc<dyn ReadingStore>,
    rainfall: Option<Arc<dyn RainfallProvider>>,
    manager: ForecastManager,
    detector: QualityDetector,
    trend: TrendAnalyzer,
    risk: DroughtRiskScorer,
    recharge: RechargeEstimator,
    /// Deactivated sensors. Operations against a member fail validation
    /// until it is reactivated.
    disabled: Arc<RwLock<HashSet<SensorKey>>>,
}

impl AnalyticsService {
    pub fn new(
        config: AnalyticsConfig,
        stations: Arc<StationRegistry>,
        readings: Arc<dyn ReadingStore>,
        models: Arc<dyn ModelStore>,
        rainfall: Option<Arc<dyn RainfallProvider>>,
    ) -> Self {
        let manager = ForecastManager::new(
            config.forecast.clone(),
            Arc::clone(&readings),
            models,
            Arc::clone(&stations),
        );
        Self {
            detector: QualityDetector::new(config.quality.clone()),
            trend: TrendAnalyzer::new(config.trend.clone()),
            risk: DroughtRiskScorer::new(config.risk.clone()),
            recharge: RechargeEstimator::new(config.recharge.clone()),
            config,
            stations,
            readings,
            rainfall,
            manager,
            disabled: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    // --- inbound operations ------------------------------------------------

    /// Scans the window for anomalies on one sensor, or on every active
    /// sensor of the station when `sensor_id` is `None`. A trailing
    /// silence check runs after the scan so a feed that stopped shows up
    /// even though no reading carries the gap.
    pub async fn get_anomalies(
        &self,
        station_id: &str,
        sensor_id: Option<&str>,
        window_days: u32,
        severity: Option<Severity>,
        now: DateTime<Utc>,
    ) -> Result<Vec<AnomalyFlag>, AnalyticsError> {
        if window_days == 0 || window_days > MAX_ANOMALY_WINDOW_DAYS {
            return Err(AnalyticsError::invalid(
                "window_days",
                format!(
                    "must be between 1 and {MAX_ANOMALY_WINDOW_DAYS} days, got {window_days}"
                ),
            ));
        }
        let station = self
            .stations
            .get(station_id)
            .ok_or_else(|| AnalyticsError::unknown_station(station_id))?;

        let sensors: Vec<&SensorProfile> = match sensor_id {
            Some(id) => {
                let sensor = station
                    .sensor(id)
                    .ok_or_else(|| AnalyticsError::unknown_sensor(station_id, id))?;
                self.ensure_enabled(&SensorKey::new(station_id, id))?;
                vec![sensor]
            }
            None => station
                .sensors
                .iter()
                .filter(|s| !self.is_disabled(&SensorKey::new(station_id, &s.sensor_id)))
                .collect(),
        };

        let start = now - Duration::days(i64::from(window_days));
        let mut flags = Vec::new();
        for sensor in sensors {
            let key = SensorKey::new(station_id, &sensor.sensor_id);
            let series = self.readings.read_series(&key, start, now).await?;
            flags.extend(self.detector.detect(&series, station, sensor, now));
            if let Some(flag) =
                staleness::trailing_dropout(&series, station, sensor, &self.config.quality, now)
            {
                flags.push(flag);
            }
        }
        if let Some(wanted) = severity {
            flags.retain(|f| f.severity == wanted);
        }
        flags.sort_by_key(|f| f.timestamp);
        debug!(
            station = %station_id,
            window_days,
            flags = flags.len(),
            "anomaly scan complete"
        );
        Ok(flags)
    }

    /// Slope, seasonality, and confidence over the trailing period.
    pub async fn get_trends(
        &self,
        station_id: &str,
        sensor_id: &str,
        period_days: u32,
        now: DateTime<Utc>,
    ) -> Result<TrendSummary, AnalyticsError> {
        if period_days == 0 || period_days > MAX_TREND_PERIOD_DAYS {
            return Err(AnalyticsError::invalid(
                "period_days",
                format!("must be between 1 and {MAX_TREND_PERIOD_DAYS} days, got {period_days}"),
            ));
        }
        let (station, sensor) = self.resolve(station_id, sensor_id)?;
        let key = SensorKey::new(station_id, sensor_id);
        self.ensure_enabled(&key)?;

        let passing = self
            .passing_window(&key, station, sensor, period_days, now)
            .await?;
        Ok(self.trend.analyze(station, sensor, &passing, period_days))
    }

    /// Trains (or retrains, with `force`) the level model for one sensor
    /// and reports its resulting status.
    pub async fn train_model(
        &self,
        station_id: &str,
        sensor_id: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<ModelStatus, AnalyticsError> {
        let (_, sensor) = self.resolve(station_id, sensor_id)?;
        let key = SensorKey::new(station_id, sensor_id);
        self.ensure_enabled(&key)?;
        require_water_level(sensor, "model training")?;
        self.manager.train(&key, force, now).await
    }

    /// Level forecast for the next `horizon_days` days.
    pub async fn get_forecast(
        &self,
        station_id: &str,
        sensor_id: &str,
        horizon_days: u32,
        now: DateTime<Utc>,
    ) -> Result<ForecastResult, AnalyticsError> {
        let (_, sensor) = self.resolve(station_id, sensor_id)?;
        let key = SensorKey::new(station_id, sensor_id);
        self.ensure_enabled(&key)?;
        require_water_level(sensor, "forecasting")?;
        self.manager.forecast(&key, horizon_days, now).await
    }

    /// Scores the current model against actual observations from the
    /// trailing `window_days`.
    pub async fn get_forecast_accuracy(
        &self,
        station_id: &str,
        sensor_id: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<AccuracyMetrics, AnalyticsError> {
        if window_days == 0 || window_days > MAX_ACCURACY_WINDOW_DAYS {
            return Err(AnalyticsError::invalid(
                "window_days",
                format!(
                    "must be between 1 and {MAX_ACCURACY_WINDOW_DAYS} days, got {window_days}"
                ),
            ));
        }
        let (_, sensor) = self.resolve(station_id, sensor_id)?;
        let key = SensorKey::new(station_id, sensor_id);
        self.ensure_enabled(&key)?;
        require_water_level(sensor, "accuracy assessment")?;
        self.manager.evaluate_accuracy(&key, window_days, now).await
    }

    /// Combined drought-risk assessment from the trend, historical
    /// percentile, and recharge signals. Signals that cannot be computed
    /// are omitted and the scorer renormalizes over the rest.
    pub async fn get_drought_risk(
        &self,
        station_id: &str,
        sensor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DroughtRiskAssessment, AnalyticsError> {
        let (station, sensor) = self.resolve(station_id, sensor_id)?;
        let key = SensorKey::new(station_id, sensor_id);
        self.ensure_enabled(&key)?;
        require_water_level(sensor, "drought risk assessment")?;
        let cfg = &self.config.risk;

        let trend_series = self
            .passing_window(&key, station, sensor, cfg.trend_window_days, now)
            .await?;
        let trend = self
            .trend
            .analyze(station, sensor, &trend_series, cfg.trend_window_days);

        let history = self
            .passing_window(&key, station, sensor, cfg.history_window_days, now)
            .await?;
        let values: Vec<f64> = history.iter().filter_map(|r| r.value).collect();
        let level_percentile = values
            .last()
            .copied()
            .and_then(|current| stats::percentile_rank(&values, current));

        let recharge_start = now - Duration::days(i64::from(cfg.recharge_window_days));
        let recharge_series = self
            .passing_window(&key, station, sensor, cfg.recharge_window_days, now)
            .await?;
        let rainfall = self.fetch_rainfall(station, recharge_start, now).await;
        let recharge_mm_per_day = match self.recharge.estimate(
            station,
            sensor,
            &recharge_series,
            rainfall.as_deref(),
            cfg.recharge_window_days,
            now,
        ) {
            Ok(estimate) => {
                Some(estimate.depth_m * 1000.0 / f64::from(cfg.recharge_window_days))
            }
            Err(e) => {
                debug!(key = %key, error = %e, "recharge signal unavailable for risk scoring");
                None
            }
        };

        let inputs = RiskInputs {
            slope_m_per_day: trend.slope_m_per_day,
            level_percentile,
            recharge_mm_per_day,
        };
        self.risk.assess(station_id, sensor_id, &inputs, now)
    }

    /// Water-table-fluctuation recharge estimate for the station's level
    /// sensor over the trailing period.
    pub async fn get_recharge(
        &self,
        station_id: &str,
        period_days: u32,
        now: DateTime<Utc>,
    ) -> Result<RechargeEstimate, AnalyticsError> {
        let bounds = &self.config.recharge;
        if period_days < bounds.min_period_days || period_days > bounds.max_period_days {
            return Err(AnalyticsError::invalid(
                "period_days",
                format!(
                    "must be between {} and {} days, got {period_days}",
                    bounds.min_period_days, bounds.max_period_days
                ),
            ));
        }
        let station = self
            .stations
            .get(station_id)
            .ok_or_else(|| AnalyticsError::unknown_station(station_id))?;
        let sensor = station.first_level_sensor().ok_or_else(|| {
            AnalyticsError::invalid(
                "station_id",
                format!("station '{station_id}' has no water-level sensor"),
            )
        })?;
        let key = SensorKey::new(station_id, &sensor.sensor_id);
        self.ensure_enabled(&key)?;

        let start = now - Duration::days(i64::from(period_days));
        let series = self.readings.read_series(&key, start, now).await?;
        let passing = quality::quality_passing(&series, station, sensor);
        let rainfall = self.fetch_rainfall(station, start, now).await;
        self.recharge.estimate(
            station,
            sensor,
            &passing,
            rainfall.as_deref(),
            period_days,
            now,
        )
    }

    /// Lifecycle state of the level model for one sensor.
    pub async fn model_status(
        &self,
        station_id: &str,
        sensor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ModelStatus, AnalyticsError> {
        self.resolve(station_id, sensor_id)?;
        let key = SensorKey::new(station_id, sensor_id);
        self.ensure_enabled(&key)?;
        self.manager.status(&key, now).await
    }

    /// Takes a sensor out of service: evicts its hot model state and
    /// refuses further operations until reactivation. Stored model
    /// versions are kept for accuracy history.
    pub fn deactivate_sensor(
        &self,
        station_id: &str,
        sensor_id: &str,
    ) -> Result<(), AnalyticsError> {
        self.resolve(station_id, sensor_id)?;
        let key = SensorKey::new(station_id, sensor_id);
        let newly = self.disabled.write().insert(key.clone());
        self.manager.evict(&key);
        if newly {
            info!(key = %key, "sensor deactivated");
        }
        Ok(())
    }

    /// Returns a deactivated sensor to service. Its persisted model, if
    /// any, is restored on the next touch.
    pub fn reactivate_sensor(
        &self,
        station_id: &str,
        sensor_id: &str,
    ) -> Result<(), AnalyticsError> {
        self.resolve(station_id, sensor_id)?;
        let key = SensorKey::new(station_id, sensor_id);
        if self.disabled.write().remove(&key) {
            info!(key = %key, "sensor reactivated");
        }
        Ok(())
    }

    // --- internals ---------------------------------------------------------

    fn resolve(
        &self,
        station_id: &str,
        sensor_id: &str,
    ) -> Result<(&StationProfile, &SensorProfile), AnalyticsError> {
        let station = self
            .stations
            .get(station_id)
            .ok_or_else(|| AnalyticsError::unknown_station(station_id))?;
        let sensor = station
            .sensor(sensor_id)
            .ok_or_else(|| AnalyticsError::unknown_sensor(station_id, sensor_id))?;
        Ok((station, sensor))
    }

    fn is_disabled(&self, key: &SensorKey) -> bool {
        self.disabled.read().contains(key)
    }

    fn ensure_enabled(&self, key: &SensorKey) -> Result<(), AnalyticsError> {
        if self.is_disabled(key) {
            return Err(AnalyticsError::invalid(
                "sensor_id",
                format!("sensor '{}' on station '{}' is deactivated", key.sensor_id, key.station_id),
            ));
        }
        Ok(())
    }

    /// Fetches the window and applies the quality gate.
    async fn passing_window(
        &self,
        key: &SensorKey,
        station: &StationProfile,
        sensor: &SensorProfile,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reading>, AnalyticsError> {
        let start = now - Duration::days(i64::from(window_days));
        let series = self.readings.read_series(key, start, now).await?;
        Ok(quality::quality_passing(&series, station, sensor))
    }

    /// `None` when no collaborator is wired or the fetch failed; the
    /// recharge path degrades to level-only either way.
    async fn fetch_rainfall(
        &self,
        station: &StationProfile,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Vec<RainfallObservation>> {
        let provider = self.rainfall.as_ref()?;
        match provider.rainfall(station, start, end).await {
            Ok(observations) => Some(observations),
            Err(e) => {
                warn!(
                    station = %station.station_id,
                    error = %e,
                    "rainfall collaborator failed, degrading to level-only"
                );
                None
            }
        }
    }
}

fn require_water_level(
    sensor: &SensorProfile,
    operation: &str,
) -> Result<(), AnalyticsError> {
    if sensor.kind != SensorKind::WaterLevel {
        return Err(AnalyticsError::invalid(
            "sensor_id",
            format!(
                "{operation} requires a water-level sensor, '{}' is {:?}",
                sensor.sensor_id, sensor.kind
            ),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
