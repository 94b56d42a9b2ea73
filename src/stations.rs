//! Station and sensor profile registry.
//!
//! Defines the monitoring stations this engine serves, along with the
//! physical well geometry, aquifer properties, and sensor cadences the
//! analytics components depend on. This is the single source of truth for
//! station/sensor identifiers; other modules look profiles up here rather
//! than hardcoding ids.
//!
//! The builtin registry mirrors the deployed network. Operators can extend
//! or replace it with a `stations.toml` file; unknown lookups surface as
//! validation errors at the facade, never as panics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Aquifer properties
// ---------------------------------------------------------------------------

/// Aquifer classes present in the monitored network. Specific yield
/// defaults are mid-range literature values; a per-station override wins
/// when site testing has produced a better number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AquiferType {
    Alluvial,
    CoastalAlluvial,
    Sandstone,
    Basalt,
    HardRock,
}

impl AquiferType {
    /// Dimensionless specific yield: the fraction of aquifer volume that
    /// drains per unit water-table drop.
    pub fn default_specific_yield(&self) -> f64 {
        match self {
            AquiferType::Alluvial => 0.12,
            AquiferType::CoastalAlluvial => 0.10,
            AquiferType::Sandstone => 0.08,
            AquiferType::Basalt => 0.03,
            AquiferType::HardRock => 0.02,
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    WaterLevel,
    Temperature,
    Battery,
}

/// Expected behavior of one physical sensor on a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    pub sensor_id: String,
    pub kind: SensorKind,
    pub unit: String,
    /// Nominal telemetry cadence. Dropout detection measures gaps against
    /// this interval.
    #[serde(default = "default_interval_minutes")]
    pub expected_interval_minutes: u32,
}

fn default_interval_minutes() -> u32 {
    15
}

// ---------------------------------------------------------------------------
// Station profiles
// ---------------------------------------------------------------------------

/// Everything the analytics engine needs to know about one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationProfile {
    pub station_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Ground surface elevation at the wellhead, metres above sea level.
    pub ground_elevation_m: f64,
    /// Depth from ground surface to well bottom, metres.
    pub well_depth_m: f64,
    pub aquifer_type: AquiferType,
    /// Site-tested specific yield. `None` falls back to the aquifer-class
    /// default.
    #[serde(default)]
    pub specific_yield: Option<f64>,
    /// Area the station represents for volume estimates, square metres.
    #[serde(default = "default_influence_area_m2")]
    pub influence_area_m2: f64,
    pub sensors: Vec<SensorProfile>,
}

fn default_influence_area_m2() -> f64 {
    1.0e6
}

impl StationProfile {
    pub fn effective_specific_yield(&self) -> f64 {
        self.specific_yield
            .unwrap_or_else(|| self.aquifer_type.default_specific_yield())
    }

    /// Physically possible water-level band: well bottom to ground surface,
    /// both as elevations (masl).
    pub fn level_bounds_m(&self) -> (f64, f64) {
        (
            self.ground_elevation_m - self.well_depth_m,
            self.ground_elevation_m,
        )
    }

    pub fn sensor(&self, sensor_id: &str) -> Option<&SensorProfile> {
        self.sensors.iter().find(|s| s.sensor_id == sensor_id)
    }

    /// The station's primary water-level sensor, if it has one. Recharge
    /// and drought operations address a station, not a sensor, and resolve
    /// through here.
    pub fn first_level_sensor(&self) -> Option<&SensorProfile> {
        self.sensors.iter().find(|s| s.kind == SensorKind::WaterLevel)
    }

    /// Valid physical range for a sensor on this station. Water level is
    /// bounded by well geometry; the other kinds carry fixed instrument
    /// ranges.
    pub fn physical_bounds(&self, sensor: &SensorProfile) -> (f64, f64) {
        match sensor.kind {
            SensorKind::WaterLevel => self.level_bounds_m(),
            SensorKind::Temperature => (-10.0, 60.0),
            SensorKind::Battery => (0.0, 15.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StationsFile {
    stations: Vec<StationProfile>,
}

/// Lookup table of station profiles, keyed by station id.
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: HashMap<String, StationProfile>,
}

impl StationRegistry {
    pub fn new(profiles: Vec<StationProfile>) -> Self {
        let mut stations = HashMap::with_capacity(profiles.len());
        for profile in profiles {
            stations.insert(profile.station_id.clone(), profile);
        }
        Self { stations }
    }

    /// The deployed monitoring network. Station identities, well geometry,
    /// and cadence come from the network as commissioned; sensors are the
    /// DWLR channels each site actually reports.
    pub fn builtin() -> Self {
        Self::new(vec![
            StationProfile {
                station_id: "BLR001".to_string(),
                name: "Bangalore Central Station".to_string(),
                latitude: 12.9716,
                longitude: 77.5946,
                ground_elevation_m: 920.0,
                well_depth_m: 45.0,
                aquifer_type: AquiferType::Alluvial,
                specific_yield: None,
                influence_area_m2: 2.5e6,
                sensors: vec![
                    SensorProfile {
                        sensor_id: "wl-01".to_string(),
                        kind: SensorKind::WaterLevel,
                        unit: "m".to_string(),
                        expected_interval_minutes: 15,
                    },
                    SensorProfile {
                        sensor_id: "tmp-01".to_string(),
                        kind: SensorKind::Temperature,
                        unit: "degC".to_string(),
                        expected_interval_minutes: 15,
                    },
                ],
            },
            StationProfile {
                station_id: "CHN001".to_string(),
                name: "Chennai Coastal Station".to_string(),
                latitude: 13.0827,
                longitude: 80.2707,
                ground_elevation_m: 6.0,
                well_depth_m: 35.0,
                aquifer_type: AquiferType::CoastalAlluvial,
                specific_yield: None,
                influence_area_m2: 1.8e6,
                sensors: vec![SensorProfile {
                    sensor_id: "wl-01".to_string(),
                    kind: SensorKind::WaterLevel,
                    unit: "m".to_string(),
                    expected_interval_minutes: 15,
                }],
            },
            StationProfile {
                station_id: "DEL001".to_string(),
                name: "Delhi Industrial Station".to_string(),
                latitude: 28.7041,
                longitude: 77.1025,
                ground_elevation_m: 216.0,
                well_depth_m: 60.0,
                aquifer_type: AquiferType::Alluvial,
                // Pump-test result from commissioning; overrides the class default.
                specific_yield: Some(0.15),
                influence_area_m2: 3.2e6,
                sensors: vec![SensorProfile {
                    sensor_id: "wl-01".to_string(),
                    kind: SensorKind::WaterLevel,
                    unit: "m".to_string(),
                    expected_interval_minutes: 15,
                }],
            },
            StationProfile {
                station_id: "MUM001".to_string(),
                name: "Mumbai Suburban Station".to_string(),
                latitude: 19.0760,
                longitude: 72.8777,
                ground_elevation_m: 14.0,
                well_depth_m: 40.0,
                aquifer_type: AquiferType::CoastalAlluvial,
                specific_yield: None,
                influence_area_m2: 1.5e6,
                sensors: vec![SensorProfile {
                    sensor_id: "wl-01".to_string(),
                    kind: SensorKind::WaterLevel,
                    unit: "m".to_string(),
                    expected_interval_minutes: 15,
                }],
            },
            StationProfile {
                station_id: "HYD001".to_string(),
                name: "Hyderabad Rural Station".to_string(),
                latitude: 17.3850,
                longitude: 78.4867,
                ground_elevation_m: 542.0,
                well_depth_m: 80.0,
                aquifer_type: AquiferType::HardRock,
                specific_yield: None,
                influence_area_m2: 4.0e6,
                sensors: vec![
                    SensorProfile {
                        sensor_id: "wl-01".to_string(),
                        kind: SensorKind::WaterLevel,
                        unit: "m".to_string(),
                        expected_interval_minutes: 15,
                    },
                    SensorProfile {
                        sensor_id: "bat-01".to_string(),
                        kind: SensorKind::Battery,
                        unit: "V".to_string(),
                        expected_interval_minutes: 60,
                    },
                ],
            },
        ])
    }

    /// Parse a `stations.toml` document (a `[[stations]]` array).
    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: StationsFile = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            source: e,
        })?;
        let registry = Self::new(file.stations);
        registry.validate()?;
        Ok(registry)
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_toml_str(&raw, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for station in self.stations.values() {
            if station.well_depth_m <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "station {}: well_depth_m must be positive",
                    station.station_id
                )));
            }
            let sy = station.effective_specific_yield();
            if !(sy > 0.0 && sy < 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "station {}: specific yield {} outside (0, 1)",
                    station.station_id, sy
                )));
            }
            if station.influence_area_m2 <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "station {}: influence_area_m2 must be positive",
                    station.station_id
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for sensor in &station.sensors {
                if !seen.insert(sensor.sensor_id.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "station {}: duplicate sensor id '{}'",
                        station.station_id, sensor.sensor_id
                    )));
                }
                if sensor.expected_interval_minutes == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "station {} sensor {}: expected_interval_minutes must be positive",
                        station.station_id, sensor.sensor_id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, station_id: &str) -> Option<&StationProfile> {
        self.stations.get(station_id)
    }

    pub fn insert(&mut self, profile: StationProfile) {
        self.stations.insert(profile.station_id.clone(), profile);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationProfile> {
        self.stations.values()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_contains_all_deployed_stations() {
        let registry = StationRegistry::builtin();
        for id in ["BLR001", "CHN001", "DEL001", "MUM001", "HYD001"] {
            assert!(
                registry.get(id).is_some(),
                "builtin registry missing deployed station '{}'",
                id
            );
        }
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_station_ids_follow_network_format() {
        // Network convention: three uppercase letters then three digits.
        // The telemetry broker routes on this shape; a malformed id would
        // never receive data.
        for station in StationRegistry::builtin().iter() {
            let id = &station.station_id;
            assert_eq!(id.len(), 6, "station id '{}' should be 6 characters", id);
            assert!(
                id[..3].chars().all(|c| c.is_ascii_uppercase()),
                "station id '{}' should start with 3 uppercase letters",
                id
            );
            assert!(
                id[3..].chars().all(|c| c.is_ascii_digit()),
                "station id '{}' should end with 3 digits",
                id
            );
        }
    }

    #[test]
    fn test_builtin_passes_validation() {
        StationRegistry::builtin()
            .validate()
            .expect("builtin registry must be internally consistent");
    }

    #[test]
    fn test_level_bounds_are_ordered() {
        for station in StationRegistry::builtin().iter() {
            let (lower, upper) = station.level_bounds_m();
            assert!(
                lower < upper,
                "well bottom must sit below ground surface for '{}'",
                station.station_id
            );
        }
    }

    #[test]
    fn test_every_station_has_a_water_level_sensor() {
        for station in StationRegistry::builtin().iter() {
            assert!(
                station.first_level_sensor().is_some(),
                "station '{}' has no water-level sensor; forecast and drought \
                 operations would have nothing to work with",
                station.station_id
            );
        }
    }

    #[test]
    fn test_specific_yield_override_beats_aquifer_default() {
        let registry = StationRegistry::builtin();
        let delhi = registry.get("DEL001").expect("DEL001 in builtin");
        assert_eq!(delhi.effective_specific_yield(), 0.15);

        let bangalore = registry.get("BLR001").expect("BLR001 in builtin");
        assert_eq!(
            bangalore.effective_specific_yield(),
            AquiferType::Alluvial.default_specific_yield()
        );
    }

    #[test]
    fn test_aquifer_yield_defaults_are_plausible() {
        let kinds = [
            AquiferType::Alluvial,
            AquiferType::CoastalAlluvial,
            AquiferType::Sandstone,
            AquiferType::Basalt,
            AquiferType::HardRock,
        ];
        for kind in kinds {
            let sy = kind.default_specific_yield();
            assert!(sy > 0.0 && sy < 0.5, "specific yield {} out of plausible range", sy);
        }
        assert!(
            AquiferType::Alluvial.default_specific_yield()
                > AquiferType::HardRock.default_specific_yield(),
            "unconsolidated aquifers drain more per unit drop than fractured rock"
        );
    }

    #[test]
    fn test_get_returns_none_for_unknown_station() {
        assert!(StationRegistry::builtin().get("XXX999").is_none());
    }

    #[test]
    fn test_sensor_lookup() {
        let registry = StationRegistry::builtin();
        let blr = registry.get("BLR001").unwrap();
        assert!(blr.sensor("wl-01").is_some());
        assert!(blr.sensor("tmp-01").is_some());
        assert!(blr.sensor("wl-99").is_none());
    }

    #[test]
    fn test_registry_parses_from_toml() {
        let toml = r#"
            [[stations]]
            station_id = "PNE001"
            name = "Pune Basalt Station"
            latitude = 18.5204
            longitude = 73.8567
            ground_elevation_m = 560.0
            well_depth_m = 55.0
            aquifer_type = "basalt"

            [[stations.sensors]]
            sensor_id = "wl-01"
            kind = "water_level"
            unit = "m"
        "#;
        let registry = StationRegistry::from_toml_str(toml, "inline").expect("should parse");
        let pune = registry.get("PNE001").expect("PNE001 parsed");
        assert_eq!(pune.aquifer_type, AquiferType::Basalt);
        assert_eq!(
            pune.sensors[0].expected_interval_minutes, 15,
            "interval should default to the 15-minute network cadence"
        );
        assert_eq!(pune.influence_area_m2, 1.0e6, "area should default to 1 km^2");
    }

    #[test]
    fn test_duplicate_sensor_ids_rejected() {
        let toml = r#"
            [[stations]]
            station_id = "PNE001"
            name = "Pune Basalt Station"
            latitude = 18.5204
            longitude = 73.8567
            ground_elevation_m = 560.0
            well_depth_m = 55.0
            aquifer_type = "basalt"

            [[stations.sensors]]
            sensor_id = "wl-01"
            kind = "water_level"
            unit = "m"

            [[stations.sensors]]
            sensor_id = "wl-01"
            kind = "temperature"
            unit = "degC"
        "#;
        assert!(StationRegistry::from_toml_str(toml, "inline").is_err());
    }

    #[test]
    fn test_physical_bounds_by_sensor_kind() {
        let registry = StationRegistry::builtin();
        let blr = registry.get("BLR001").unwrap();

        let wl = blr.sensor("wl-01").unwrap();
        assert_eq!(blr.physical_bounds(wl), (875.0, 920.0));

        let tmp = blr.sensor("tmp-01").unwrap();
        assert_eq!(blr.physical_bounds(tmp), (-10.0, 60.0));
    }
}
