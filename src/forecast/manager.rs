//! Per-sensor model lifecycle and training exclusivity.
//!
//! Each sensor key owns one slot holding the committed model (if any),
//! a degraded mark from accuracy evaluation, and at most one in-flight
//! training run. Requests joining an in-flight run share its outcome over
//! a watch channel instead of starting a second fit for the same key.
//!
//! Availability policy: a committed model keeps serving while its
//! replacement trains. A stale model answers forecasts immediately and a
//! background refresh is kicked off; only a key with no committed model at
//! all refuses, and then only for callers that did not initiate the
//! training themselves.
//!
//! Cancellation: waiters hold interest tickets. A run whose waiters have
//! all vanished abandons at the next checkpoint instead of committing; a
//! run that has passed its final checkpoint always commits. Commits swap
//! the slot under the registry lock, so readers see either the old model
//! or the new one, never a half-written state.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ForecastConfig;
use crate::error::AnalyticsError;
use crate::forecast::{
    AccuracyMetrics, LevelModel, ModelParameters, ModelState, ModelStatus, ModelStore,
    TrainedModel, NOMINAL_CONFIDENCE_LEVEL,
};
use crate::ingest::ReadingStore;
use crate::model::{ForecastResult, SensorKey};
use crate::quality;
use crate::stations::{SensorProfile, StationProfile, StationRegistry};

/// A committed model held hot: the stored record plus its decoded,
/// ready-to-predict form.
struct ActiveModel {
    record: TrainedModel,
    model: LevelModel,
}

/// One sensor key's lifecycle slot.
#[derive(Default)]
struct KeyEntry {
    active: Option<Arc<ActiveModel>>,
    /// Set when an accuracy evaluation fell below the floor; forces STALE
    /// until the next commit clears it.
    degraded: bool,
    training: Option<TrainingRun>,
}

/// Terminal outcome of one training run.
#[derive(Clone)]
enum RunResult {
    Committed(u32),
    Abandoned,
    Failed(AnalyticsError),
}

/// Handle to an in-flight run. Cloning is how callers join it.
#[derive(Clone)]
struct TrainingRun {
    outcome: watch::Receiver<Option<RunResult>>,
    interest: Arc<AtomicUsize>,
}

/// Keeps a run worth finishing. Dropping the last ticket before the final
/// checkpoint lets the run abandon without committing.
struct InterestTicket(Arc<AtomicUsize>);

impl InterestTicket {
    fn register(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InterestTicket {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cheap-to-clone handle; clones share the slot registry and stores.
/// Training tasks carry a clone across `tokio::spawn`.
#[derive(Clone)]
pub struct ForecastManager {
    config: ForecastConfig,
    readings: Arc<dyn ReadingStore>,
    store: Arc<dyn ModelStore>,
    stations: Arc<StationRegistry>,
    slots: Arc<Mutex<HashMap<SensorKey, KeyEntry>>>,
}

impl ForecastManager {
    pub fn new(
        config: ForecastConfig,
        readings: Arc<dyn ReadingStore>,
        store: Arc<dyn ModelStore>,
        stations: Arc<StationRegistry>,
    ) -> Self {
        Self {
            config,
            readings,
            store,
            stations,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Trains (or retrains) the model for one key.
    ///
    /// Without `force`, a READY model makes this a no-op; STALE or absent
    /// models train. With `force`, an existing in-flight run is joined
    /// rather than superseded, otherwise a fresh run starts. The caller
    /// awaits the run it initiated or joined.
    pub async fn train(
        &self,
        key: &SensorKey,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<ModelStatus, AnalyticsError> {
        let (station, sensor) = self.resolve(key)?;
        self.ensure_restored(key).await?;

        let (run, _ticket) = {
            let mut slots = self.slots.lock();
            let entry = slots.entry(key.clone()).or_default();
            if let Some(run) = &entry.training {
                let run = run.clone();
                let ticket = InterestTicket::register(&run.interest);
                (run, ticket)
            } else {
                let fresh = match &entry.active {
                    Some(active) => {
                        !entry.degraded && !self.is_expired(active.record.trained_at, now)
                    }
                    None => false,
                };
                if fresh && !force {
                    return Ok(self.build_status(key, Some(entry), now));
                }
                let (run, ticket) = self.spawn_training(key.clone(), station, sensor, now, false);
                entry.training = Some(run.clone());
                let ticket = ticket.unwrap_or_else(|| InterestTicket::register(&run.interest));
                (run, ticket)
            }
        };

        await_outcome(run.outcome).await?;

        let slots = self.slots.lock();
        Ok(self.build_status(key, slots.get(key), now))
    }

    /// Produces a forecast from the current model.
    ///
    /// An untrained key trains first and the initiating caller waits for
    /// it; concurrent callers arriving mid-training get `ModelNotReady`.
    /// A stale model serves immediately while a detached refresh runs.
    pub async fn forecast(
        &self,
        key: &SensorKey,
        horizon_days: u32,
        now: DateTime<Utc>,
    ) -> Result<ForecastResult, AnalyticsError> {
        if horizon_days == 0 || horizon_days > self.config.max_horizon_days {
            return Err(AnalyticsError::invalid(
                "horizon_days",
                format!(
                    "must be between 1 and {} days, got {}",
                    self.config.max_horizon_days, horizon_days
                ),
            ));
        }
        let (station, sensor) = self.resolve(key)?;
        self.ensure_restored(key).await?;

        enum Decision {
            Serve(Arc<ActiveModel>),
            AwaitInitial(TrainingRun, InterestTicket),
            NotReady,
        }

        let decision = {
            let mut slots = self.slots.lock();
            let entry = slots.entry(key.clone()).or_default();
            match &entry.active {
                Some(active) => {
                    let serving = Arc::clone(active);
                    let stale =
                        entry.degraded || self.is_expired(serving.record.trained_at, now);
                    if stale && entry.training.is_none() {
                        let (run, _) =
                            self.spawn_training(key.clone(), station, sensor, now, true);
                        entry.training = Some(run);
                        info!(
                            key = %key,
                            version = serving.record.version,
                            "serving stale model while a background retrain runs"
                        );
                    }
                    Decision::Serve(serving)
                }
                None => {
                    if entry.training.is_some() {
                        Decision::NotReady
                    } else {
                        let (run, ticket) =
                            self.spawn_training(key.clone(), station, sensor, now, false);
                        entry.training = Some(run.clone());
                        let ticket =
                            ticket.unwrap_or_else(|| InterestTicket::register(&run.interest));
                        Decision::AwaitInitial(run, ticket)
                    }
                }
            }
        };

        let active = match decision {
            Decision::Serve(active) => active,
            Decision::NotReady => {
                return Err(AnalyticsError::ModelNotReady {
                    station_id: key.station_id.clone(),
                    sensor_id: key.sensor_id.clone(),
                });
            }
            Decision::AwaitInitial(run, ticket) => {
                let outcome = await_outcome(run.outcome).await;
                drop(ticket);
                outcome?;
                // Gone despite the commit only when the key was evicted
                // while we waited.
                self.slots
                    .lock()
                    .get(key)
                    .and_then(|entry| entry.active.clone())
                    .ok_or_else(|| AnalyticsError::ModelNotReady {
                        station_id: key.station_id.clone(),
                        sensor_id: key.sensor_id.clone(),
                    })?
            }
        };

        Ok(ForecastResult {
            station_id: key.station_id.clone(),
            sensor_id: key.sensor_id.clone(),
            horizon_days,
            generated_at: now,
            model_version: active.record.version,
            points: active.model.predict(now, horizon_days),
            confidence_level: NOMINAL_CONFIDENCE_LEVEL,
        })
    }

    /// Scores the current model against the trailing observation window.
    /// A score below the configured floor marks the model degraded, which
    /// reads as STALE and schedules a retrain on next use.
    pub async fn evaluate_accuracy(
        &self,
        key: &SensorKey,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<AccuracyMetrics, AnalyticsError> {
        let (station, sensor) = self.resolve(key)?;
        self.ensure_restored(key).await?;

        let active = self
            .slots
            .lock()
            .get(key)
            .and_then(|entry| entry.active.clone())
            .ok_or_else(|| AnalyticsError::ModelNotReady {
                station_id: key.station_id.clone(),
                sensor_id: key.sensor_id.clone(),
            })?;

        let start = now - Duration::days(i64::from(window_days));
        let series = self.readings.read_series(key, start, now).await?;
        let passing = quality::quality_passing(&series, &station, &sensor);
        let metrics = active
            .model
            .evaluate(&passing, self.config.accuracy_tolerance_m)
            .ok_or_else(|| AnalyticsError::InsufficientData {
                station_id: key.station_id.clone(),
                sensor_id: key.sensor_id.clone(),
                points_available: 0,
                points_required: 1,
                operation: "forecast accuracy evaluation",
            })?;

        if metrics.within_tolerance < self.config.min_holdout_accuracy {
            let mut slots = self.slots.lock();
            if let Some(entry) = slots.get_mut(key) {
                // Only demote the model that was actually evaluated; a
                // commit may have landed while we were reading.
                let still_current = entry
                    .active
                    .as_ref()
                    .is_some_and(|a| a.record.version == active.record.version);
                if still_current && !entry.degraded {
                    info!(
                        key = %key,
                        version = active.record.version,
                        within_tolerance = metrics.within_tolerance,
                        floor = self.config.min_holdout_accuracy,
                        "model accuracy below floor; marked stale"
                    );
                    entry.degraded = true;
                }
            }
        }
        Ok(metrics)
    }

    /// Reports the lifecycle state and provenance for one key.
    pub async fn status(
        &self,
        key: &SensorKey,
        now: DateTime<Utc>,
    ) -> Result<ModelStatus, AnalyticsError> {
        self.resolve(key)?;
        self.ensure_restored(key).await?;
        let slots = self.slots.lock();
        Ok(self.build_status(key, slots.get(key), now))
    }

    /// Drops the hot state for a deactivated sensor. Stored versions stay
    /// for accuracy history; the next touch after reactivation restores
    /// the latest one. Returns whether anything was held.
    pub fn evict(&self, key: &SensorKey) -> bool {
        let mut slots = self.slots.lock();
        match slots.remove(key) {
            Some(entry) => {
                info!(key = %key, "evicted model state");
                entry.active.is_some() || entry.training.is_some()
            }
            None => false,
        }
    }

    // --- internals ---------------------------------------------------------

    fn resolve(
        &self,
        key: &SensorKey,
    ) -> Result<(StationProfile, SensorProfile), AnalyticsError> {
        let station = self
            .stations
            .get(&key.station_id)
            .ok_or_else(|| AnalyticsError::unknown_station(&key.station_id))?;
        let sensor = station
            .sensor(&key.sensor_id)
            .ok_or_else(|| AnalyticsError::unknown_sensor(&key.station_id, &key.sensor_id))?;
        Ok((station.clone(), sensor.clone()))
    }

    /// Seeds the slot from the store on first touch, so a restarted
    /// process serves persisted models without retraining.
    async fn ensure_restored(&self, key: &SensorKey) -> Result<(), AnalyticsError> {
        if self.slots.lock().contains_key(key) {
            return Ok(());
        }
        let restored = self.store.latest(key).await?;
        let mut slots = self.slots.lock();
        let entry = slots.entry(key.clone()).or_default();
        if entry.active.is_none() && entry.training.is_none() {
            if let Some(record) = restored {
                match ModelParameters::from_bytes(&record.parameters) {
                    Ok(params) => {
                        debug!(key = %key, version = record.version, "restored model from store");
                        entry.active = Some(Arc::new(ActiveModel {
                            model: LevelModel::from_parameters(params),
                            record,
                        }));
                    }
                    Err(e) => warn!(
                        key = %key,
                        error = %e,
                        "stored model failed to decode; key treated as untrained"
                    ),
                }
            }
        }
        Ok(())
    }

    fn is_expired(&self, trained_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - trained_at).num_seconds() as f64 > self.config.retrain_after_days * 86_400.0
    }

    fn state_of(&self, entry: &KeyEntry, now: DateTime<Utc>) -> ModelState {
        match &entry.active {
            Some(active) => {
                if entry.degraded || self.is_expired(active.record.trained_at, now) {
                    ModelState::Stale
                } else {
                    ModelState::Ready
                }
            }
            None => {
                if entry.training.is_some() {
                    ModelState::Training
                } else {
                    ModelState::Untrained
                }
            }
        }
    }

    /// A missing entry reads as UNTRAINED (never touched, or evicted).
    fn build_status(
        &self,
        key: &SensorKey,
        entry: Option<&KeyEntry>,
        now: DateTime<Utc>,
    ) -> ModelStatus {
        let (version, trained_at, training_points, holdout) =
            match entry.and_then(|e| e.active.as_ref()) {
                Some(a) => (
                    Some(a.record.version),
                    Some(a.record.trained_at),
                    Some(a.record.training_points),
                    a.record.holdout.clone(),
                ),
                None => (None, None, None, None),
            };
        ModelStatus {
            station_id: key.station_id.clone(),
            sensor_id: key.sensor_id.clone(),
            state: entry
                .map(|e| self.state_of(e, now))
                .unwrap_or(ModelState::Untrained),
            version,
            trained_at,
            training_points,
            holdout,
            degraded: entry.is_some_and(|e| e.degraded),
        }
    }

    /// Starts the training task for a key. For caller-initiated runs the
    /// initiator's interest ticket is registered before the task can
    /// observe the counter; detached (background) runs carry their own
    /// ticket so they always reach commit.
    fn spawn_training(
        &self,
        key: SensorKey,
        station: StationProfile,
        sensor: SensorProfile,
        now: DateTime<Utc>,
        detached: bool,
    ) -> (TrainingRun, Option<InterestTicket>) {
        let (tx, rx) = watch::channel(None);
        let interest = Arc::new(AtomicUsize::new(0));
        let run = TrainingRun {
            outcome: rx,
            interest: Arc::clone(&interest),
        };
        let (task_ticket, caller_ticket) = if detached {
            (Some(InterestTicket::register(&interest)), None)
        } else {
            (None, Some(InterestTicket::register(&interest)))
        };

        let manager = self.clone();
        tokio::spawn(async move {
            let _keepalive = task_ticket;
            let result = manager
                .run_training(&key, &station, &sensor, now, &interest)
                .await;
            match &result {
                RunResult::Committed(version) => {
                    info!(key = %key, version, "model training committed")
                }
                RunResult::Abandoned => {
                    debug!(key = %key, "training abandoned, all waiters gone")
                }
                RunResult::Failed(e) => warn!(key = %key, error = %e, "model training failed"),
            }
            {
                let mut slots = manager.slots.lock();
                if let Some(entry) = slots.get_mut(&key) {
                    entry.training = None;
                }
            }
            let _ = tx.send(Some(result));
        });
        (run, caller_ticket)
    }

    /// One training run: fetch, filter, fit, commit. Interest is checked
    /// after each expensive stage; past the last check the commit always
    /// completes.
    async fn run_training(
        &self,
        key: &SensorKey,
        station: &StationProfile,
        sensor: &SensorProfile,
        now: DateTime<Utc>,
        interest: &AtomicUsize,
    ) -> RunResult {
        let start = now - Duration::days(i64::from(self.config.training_window_days));
        let series = match self.readings.read_series(key, start, now).await {
            Ok(series) => series,
            Err(e) => return RunResult::Failed(e),
        };
        if interest.load(Ordering::SeqCst) == 0 {
            return RunResult::Abandoned;
        }

        let passing = quality::quality_passing(&series, station, sensor);
        let training_points = passing.len();
        let fit_key = key.clone();
        let fit_config = self.config.clone();
        let fit =
            tokio::task::spawn_blocking(move || LevelModel::fit(&fit_key, &passing, &fit_config))
                .await;
        let (model, holdout) = match fit {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return RunResult::Failed(e),
            Err(e) => {
                return RunResult::Failed(AnalyticsError::Internal(format!(
                    "training task join: {e}"
                )));
            }
        };
        if interest.load(Ordering::SeqCst) == 0 {
            return RunResult::Abandoned;
        }

        // Commit point. Version numbers are per-key and append-only.
        let next_version = match self.store.versions(key).await {
            Ok(versions) => versions.last().copied().unwrap_or(0) + 1,
            Err(e) => return RunResult::Failed(e),
        };
        let parameters = match model.parameters().to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => return RunResult::Failed(e),
        };
        let record = TrainedModel {
            key: key.clone(),
            version: next_version,
            trained_at: now,
            training_points,
            holdout: holdout.clone(),
            parameters,
        };
        if let Err(e) = self.store.put(record.clone()).await {
            return RunResult::Failed(e);
        }

        let degraded = holdout
            .as_ref()
            .is_some_and(|m| m.within_tolerance < self.config.min_holdout_accuracy);
        {
            let mut slots = self.slots.lock();
            match slots.get_mut(key) {
                Some(entry) => {
                    entry.active = Some(Arc::new(ActiveModel { record, model }));
                    entry.degraded = degraded;
                }
                // Evicted mid-run: the version stays in the store only.
                None => debug!(key = %key, "slot evicted during training, hot install skipped"),
            }
        }
        RunResult::Committed(next_version)
    }
}

async fn await_outcome(
    mut rx: watch::Receiver<Option<RunResult>>,
) -> Result<u32, AnalyticsError> {
    loop {
        if let Some(result) = rx.borrow_and_update().clone() {
            return match result {
                RunResult::Committed(version) => Ok(version),
                RunResult::Abandoned => Err(AnalyticsError::Internal(
                    "training run abandoned before commit".to_string(),
                )),
                RunResult::Failed(e) => Err(e),
            };
        }
        if rx.changed().await.is_err() {
            return Err(AnalyticsError::Internal(
                "training task ended without reporting".to_string(),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
