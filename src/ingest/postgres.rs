//! Reading store over the telemetry warehouse.
//!
//! Readings land in the `readings` table via the ingestion daemon; this
//! module only ever reads. The driver is synchronous, so queries run on
//! the blocking pool with the client behind a mutex. One connection is
//! plenty: series reads are short and the analytics callers serialize per
//! sensor anyway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use postgres::{Client, NoTls};
use std::env;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AnalyticsError, ConfigError};
use crate::ingest::{normalize_series, ReadingStore};
use crate::model::{QualityFlag, Reading, SensorKey};

const SERIES_QUERY: &str = "
    SELECT station_id, sensor_id, obs_time, value, unit, quality_flag
    FROM readings
    WHERE station_id = $1
      AND sensor_id = $2
      AND obs_time >= $3
      AND obs_time <= $4
    ORDER BY obs_time
";

pub struct PgReadingStore {
    client: Arc<Mutex<Client>>,
}

impl PgReadingStore {
    /// Connects using `DATABASE_URL` from the environment (a `.env` file
    /// is honoured).
    pub fn connect() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::Invalid("DATABASE_URL is not set".to_string()))?;
        let client = Client::connect(&database_url, NoTls)
            .map_err(|e| ConfigError::Invalid(format!("database connection failed: {e}")))?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
        }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn read_series(
        &self,
        key: &SensorKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, AnalyticsError> {
        let client = Arc::clone(&self.client);
        let query_key = key.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let mut client = client.lock();
            client.query(
                SERIES_QUERY,
                &[
                    &query_key.station_id,
                    &query_key.sensor_id,
                    &start,
                    &end,
                ],
            )
        })
        .await
        .map_err(|e| AnalyticsError::Internal(format!("database task join: {e}")))?
        .map_err(|e| AnalyticsError::DataUnavailable {
            station_id: key.station_id.clone(),
            origin: "postgres",
            reason: e.to_string(),
        })?;

        let mut readings = Vec::with_capacity(rows.len());
        for row in rows {
            readings.push(Reading {
                station_id: row.get(0),
                sensor_id: row.get(1),
                timestamp: row.get(2),
                value: row.get::<_, Option<f64>>(3),
                unit: row.get(4),
                quality_flag: parse_flag(row.get::<_, Option<&str>>(5)),
            });
        }
        debug!(
            key = %key,
            rows = readings.len(),
            "fetched series from warehouse"
        );
        Ok(normalize_series(readings))
    }
}

/// Warehouse flags are free-text; anything unrecognized is treated as
/// unreviewed rather than rejected.
fn parse_flag(raw: Option<&str>) -> QualityFlag {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("approved") => QualityFlag::Approved,
        Some("suspect") => QualityFlag::Suspect,
        Some("rejected") => QualityFlag::Rejected,
        _ => QualityFlag::Provisional,
    }
}
