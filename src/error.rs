//! Error taxonomy for the analytics engine.
//!
//! Four conditions are meaningful to callers and carry enough context to
//! render a precise message: too little data, a collaborator outage, a
//! rejected parameter, and a model that is still training. Anomalies in
//! individual readings are data, not errors; they surface as
//! `AnomalyFlag`s, never through this enum.

use thiserror::Error;

/// Engine-level error returned by every facade operation.
///
/// A training run's outcome is broadcast to every waiter through a watch
/// channel, which requires errors to be `Clone`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    /// Too few quality-passing points for the requested operation. Fatal
    /// to the request: the caller should wait for more data; the engine
    /// never substitutes a degraded result.
    #[error(
        "insufficient data for {station_id}/{sensor_id}: {points_available} quality-passing \
         points available, {points_required} required for {operation}"
    )]
    InsufficientData {
        station_id: String,
        sensor_id: String,
        points_available: usize,
        points_required: usize,
        operation: &'static str,
    },

    /// A collaborator (reading store, weather API) was unreachable or timed
    /// out. Retryable by the caller with backoff; the engine does not retry.
    #[error("data unavailable for station {station_id} ({origin}): {reason}")]
    DataUnavailable {
        station_id: String,
        /// Which collaborator failed, e.g. `"postgres"` or `"nasa-power"`.
        origin: &'static str,
        reason: String,
    },

    /// A request parameter failed its precondition (horizon/period bounds,
    /// unknown station or sensor, wrong sensor kind).
    #[error("validation failed for {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// A forecast was requested while the model is TRAINING and no prior
    /// READY model exists to serve.
    #[error("model for {station_id}/{sensor_id} is training and no previous model is available")]
    ModelNotReady {
        station_id: String,
        sensor_id: String,
    },

    /// Invariant breakage inside the engine (a training task that vanished,
    /// a poisoned channel). Not a domain condition; indicates a bug.
    #[error("internal analytics error: {0}")]
    Internal(String),
}

impl AnalyticsError {
    /// Shorthand for parameter-bound violations.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        AnalyticsError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Shorthand for unknown station/sensor lookups, which are validation
    /// failures from the caller's point of view.
    pub fn unknown_station(station_id: &str) -> Self {
        AnalyticsError::Validation {
            field: "station_id",
            message: format!("station '{}' is not registered", station_id),
        }
    }

    pub fn unknown_sensor(station_id: &str, sensor_id: &str) -> Self {
        AnalyticsError::Validation {
            field: "sensor_id",
            message: format!("sensor '{}' is not registered on station '{}'", sensor_id, station_id),
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
