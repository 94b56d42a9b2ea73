//! In-process stores backing tests and embedded deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::AnalyticsError;
use crate::ingest::{normalize_series, RainfallProvider, ReadingStore};
use crate::model::{RainfallObservation, Reading, SensorKey};
use crate::stations::StationProfile;

/// Reading store over a process-local map. Inserts append; ordering and
/// de-duplication happen at read time through [`normalize_series`], the
/// same as the warehouse-backed store.
#[derive(Default)]
pub struct InMemoryReadingStore {
    series: RwLock<HashMap<SensorKey, Vec<Reading>>>,
}

impl InMemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends readings, grouping by the station/sensor pair each carries.
    pub fn insert(&self, readings: Vec<Reading>) {
        let mut series = self.series.write();
        for reading in readings {
            let key = SensorKey::new(&reading.station_id, &reading.sensor_id);
            series.entry(key).or_default().push(reading);
        }
    }
}

#[async_trait]
impl ReadingStore for InMemoryReadingStore {
    async fn read_series(
        &self,
        key: &SensorKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, AnalyticsError> {
        let raw = {
            let series = self.series.read();
            match series.get(key) {
                Some(readings) => readings
                    .iter()
                    .filter(|r| r.timestamp >= start && r.timestamp <= end)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };
        Ok(normalize_series(raw))
    }
}

/// Rainfall provider over per-station observation lists.
#[derive(Default)]
pub struct InMemoryRainfall {
    observations: RwLock<HashMap<String, Vec<RainfallObservation>>>,
}

impl InMemoryRainfall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, station_id: &str, observations: Vec<RainfallObservation>) {
        self.observations
            .write()
            .entry(station_id.to_string())
            .or_default()
            .extend(observations);
    }
}

#[async_trait]
impl RainfallProvider for InMemoryRainfall {
    async fn rainfall(
        &self,
        station: &StationProfile,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RainfallObservation>, AnalyticsError> {
        let mut in_range: Vec<RainfallObservation> = {
            let observations = self.observations.read();
            match observations.get(&station.station_id) {
                Some(all) => all
                    .iter()
                    .filter(|o| o.timestamp >= start && o.timestamp <= end)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };
        in_range.sort_by_key(|o| o.timestamp);
        Ok(in_range)
    }
}
