//! NASA POWER daily precipitation client.
//!
//! POWER serves gridded satellite-derived meteorology by coordinate, so
//! any station with a latitude and longitude gets rainfall without local
//! gauge hardware. `PRECTOTCORR` is the bias-corrected daily total in
//! millimetres.
//!
//! API documentation: https://power.larc.nasa.gov/docs/services/api/

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::AnalyticsError;
use crate::ingest::RainfallProvider;
use crate::model::RainfallObservation;
use crate::stations::StationProfile;

const POWER_BASE_URL: &str = "https://power.larc.nasa.gov/api/temporal/daily/point";

/// POWER encodes missing days as -999.0; anything at or below this
/// threshold is treated as fill.
const POWER_FILL_THRESHOLD: f64 = -900.0;

// ---------------------------------------------------------------------------
// API response structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PowerResponse {
    properties: PowerProperties,
}

#[derive(Debug, Deserialize)]
struct PowerProperties {
    parameter: PowerParameters,
}

#[derive(Debug, Deserialize)]
struct PowerParameters {
    /// Keyed by `YYYYMMDD`; the BTreeMap keeps days ascending.
    #[serde(rename = "PRECTOTCORR")]
    precipitation: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct NasaPowerClient {
    http: reqwest::Client,
}

impl NasaPowerClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RainfallProvider for NasaPowerClient {
    async fn rainfall(
        &self,
        station: &StationProfile,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RainfallObservation>, AnalyticsError> {
        let url = format!(
            "{}?parameters=PRECTOTCORR&community=AG&longitude={}&latitude={}&start={}&end={}&format=JSON",
            POWER_BASE_URL,
            station.longitude,
            station.latitude,
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
        );

        let unavailable = |reason: String| AnalyticsError::DataUnavailable {
            station_id: station.station_id.clone(),
            origin: "nasa-power",
            reason,
        };

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("POWER API error: {}", response.status())));
        }
        let parsed: PowerResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("POWER response decode: {e}")))?;

        let observations = observations_from_response(parsed);
        debug!(
            station = %station.station_id,
            days = observations.len(),
            "fetched POWER precipitation"
        );
        Ok(observations)
    }
}

/// Flattens the per-day map, dropping fill values and unparseable keys.
fn observations_from_response(response: PowerResponse) -> Vec<RainfallObservation> {
    let mut observations = Vec::new();
    for (day, value) in response.properties.parameter.precipitation {
        if value <= POWER_FILL_THRESHOLD {
            continue;
        }
        match NaiveDate::parse_from_str(&day, "%Y%m%d") {
            Ok(date) => observations.push(RainfallObservation {
                timestamp: date.and_time(NaiveTime::MIN).and_utc(),
                rainfall_mm: value,
            }),
            Err(_) => warn!(day = %day, "POWER returned an unparseable date key"),
        }
    }
    observations
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
