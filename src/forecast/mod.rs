//! Level forecasting: model fitting, versioned storage, and lifecycle.
//!
//! Split three ways:
//! - `model`: the deterministic robust-trend plus monthly-seasonal fit
//!   and its serialized parameter form;
//! - `store`: append-only versioned persistence for trained models;
//! - `manager`: the per-sensor lifecycle (untrained, training, ready,
//!   stale), training exclusivity, and the serve-while-retraining policy.
//!
//! Training is deterministic end to end. Fitting the same series twice
//! produces byte-identical parameters, which is what makes model versions
//! comparable and re-runs debuggable.

pub mod manager;
pub mod model;
pub mod store;

pub use manager::ForecastManager;
pub use model::{LevelModel, ModelParameters};
pub use store::{InMemoryModelStore, ModelStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::SensorKey;

/// Nominal coverage of the prediction interval produced by the default
/// z multiplier.
pub const NOMINAL_CONFIDENCE_LEVEL: f64 = 0.95;

/// Lifecycle state of the model slot for one sensor key. Derived on
/// access, never stored: age and accuracy decide between READY and STALE
/// at the moment someone asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelState {
    Untrained,
    Training,
    Ready,
    Stale,
}

/// Accuracy of a model against observations it did not train on, either
/// the chronological holdout at train time or a recent window on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub mean_absolute_error_m: f64,
    pub root_mean_square_error_m: f64,
    /// Fraction of evaluated points whose absolute error is within the
    /// configured tolerance, in [0, 1].
    pub within_tolerance: f64,
    pub evaluated_points: usize,
}

/// A committed model with its provenance. Immutable once stored; retrains
/// produce a new version rather than touching this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub key: SensorKey,
    pub version: u32,
    pub trained_at: DateTime<Utc>,
    /// Quality-passing points the fit consumed.
    pub training_points: usize,
    /// Holdout metrics from training, when the series was long enough to
    /// spare a holdout tail.
    pub holdout: Option<AccuracyMetrics>,
    /// Serialized [`ModelParameters`], opaque to the store.
    pub parameters: Vec<u8>,
}

/// Status surface for one sensor key, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub station_id: String,
    pub sensor_id: String,
    pub state: ModelState,
    pub version: Option<u32>,
    pub trained_at: Option<DateTime<Utc>>,
    pub training_points: Option<usize>,
    pub holdout: Option<AccuracyMetrics>,
    /// Set when an accuracy evaluation fell below the configured floor;
    /// forces STALE until the next successful retrain.
    pub degraded: bool,
}
