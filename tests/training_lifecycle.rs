/// Integration tests for the forecast model lifecycle
///
/// Tests verify, end to end through `AnalyticsService` over in-memory
/// stores:
/// 1. The minimum-history gate on training
/// 2. Horizon validation (inclusive cap)
/// 3. Training exclusivity under concurrent requests
/// 4. Forecast determinism for a fixed model version and window
/// 5. Model persistence across service restarts
///
/// Run with: cargo test --test training_lifecycle
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use gwmon_analytics::facade::AnalyticsService;
use gwmon_analytics::forecast::{InMemoryModelStore, ModelState, ModelStore};
use gwmon_analytics::ingest::{InMemoryReadingStore, ReadingStore};
use gwmon_analytics::model::{QualityFlag, Reading, SensorKey};
use gwmon_analytics::stations::StationRegistry;
use gwmon_analytics::{AnalyticsConfig, AnalyticsError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

fn key() -> SensorKey {
    SensorKey::new("BLR001", "wl-01")
}

/// Daily level readings ending at `t0`, declining 2 cm/day.
fn history(days: usize) -> Vec<Reading> {
    (0..days)
        .map(|i| {
            let back = (days - 1 - i) as i64;
            Reading {
                station_id: "BLR001".to_string(),
                sensor_id: "wl-01".to_string(),
                timestamp: t0() - Duration::days(back),
                value: Some(898.0 - 0.02 * i as f64),
                unit: "m".to_string(),
                quality_flag: QualityFlag::Approved,
            }
        })
        .collect()
}

struct Fixture {
    service: AnalyticsService,
    readings: Arc<InMemoryReadingStore>,
    models: Arc<InMemoryModelStore>,
}

fn fixture(series: Vec<Reading>) -> Fixture {
    gwmon_analytics::logging::init();
    let readings = Arc::new(InMemoryReadingStore::new());
    readings.insert(series);
    let models = Arc::new(InMemoryModelStore::new());
    let service = AnalyticsService::new(
        AnalyticsConfig::default(),
        Arc::new(StationRegistry::builtin()),
        Arc::clone(&readings) as Arc<dyn ReadingStore>,
        Arc::clone(&models) as Arc<dyn ModelStore>,
        None,
    );
    Fixture {
        service,
        readings,
        models,
    }
}

// ---------------------------------------------------------------------------
// Training preconditions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_training_requires_minimum_history() {
    let fx = fixture(history(10));

    let err = fx
        .service
        .train_model("BLR001", "wl-01", false, t0())
        .await
        .unwrap_err();
    match err {
        AnalyticsError::InsufficientData {
            points_available,
            points_required,
            ..
        } => {
            assert_eq!(points_available, 10);
            assert_eq!(points_required, 30);
        }
        other => panic!("expected InsufficientData, got {other}"),
    }

    let status = fx
        .service
        .model_status("BLR001", "wl-01", t0())
        .await
        .unwrap();
    assert_eq!(status.state, ModelState::Untrained);
    assert_eq!(status.version, None);
    assert!(
        fx.models.versions(&key()).await.unwrap().is_empty(),
        "a failed run must not commit"
    );
}

// ---------------------------------------------------------------------------
// Horizon validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_horizon_cap_is_inclusive() {
    let fx = fixture(history(60));
    fx.service
        .train_model("BLR001", "wl-01", false, t0())
        .await
        .unwrap();

    let at_cap = fx
        .service
        .get_forecast("BLR001", "wl-01", 30, t0())
        .await
        .unwrap();
    assert_eq!(at_cap.points.len(), 30, "the cap itself is allowed");

    for horizon in [0u32, 45] {
        let err = fx
            .service
            .get_forecast("BLR001", "wl-01", horizon, t0())
            .await
            .unwrap_err();
        assert!(
            matches!(err, AnalyticsError::Validation { field: "horizon_days", .. }),
            "horizon {horizon}: {err}"
        );
    }
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_training_requests_share_one_run() {
    let fx = fixture(history(60));

    let (a, b) = tokio::join!(
        fx.service.train_model("BLR001", "wl-01", false, t0()),
        fx.service.train_model("BLR001", "wl-01", false, t0()),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.version, Some(1));
    assert_eq!(b.version, Some(1), "the second request joins the first run");
    assert_eq!(
        fx.models.versions(&key()).await.unwrap(),
        vec![1],
        "exactly one version may be committed"
    );
}

#[tokio::test]
async fn test_force_retrain_commits_a_new_version() {
    let fx = fixture(history(60));
    fx.service
        .train_model("BLR001", "wl-01", false, t0())
        .await
        .unwrap();

    let status = fx
        .service
        .train_model("BLR001", "wl-01", true, t0())
        .await
        .unwrap();
    assert_eq!(status.version, Some(2));
    assert_eq!(fx.models.versions(&key()).await.unwrap(), vec![1, 2]);
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_forecast_is_deterministic_for_a_fixed_model_and_window() {
    let fx = fixture(history(60));
    fx.service
        .train_model("BLR001", "wl-01", false, t0())
        .await
        .unwrap();

    let first = fx
        .service
        .get_forecast("BLR001", "wl-01", 14, t0())
        .await
        .unwrap();
    let second = fx
        .service
        .get_forecast("BLR001", "wl-01", 14, t0())
        .await
        .unwrap();
    assert_eq!(first.model_version, second.model_version);
    assert_eq!(
        first.points, second.points,
        "the same model and window must reproduce bit-identical points"
    );
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_model_survives_a_service_restart() {
    let fx = fixture(history(60));
    fx.service
        .train_model("BLR001", "wl-01", false, t0())
        .await
        .unwrap();

    // A new service over the same stores, as after a process restart.
    let restarted = AnalyticsService::new(
        AnalyticsConfig::default(),
        Arc::new(StationRegistry::builtin()),
        Arc::clone(&fx.readings) as Arc<dyn ReadingStore>,
        Arc::clone(&fx.models) as Arc<dyn ModelStore>,
        None,
    );

    let status = restarted
        .model_status("BLR001", "wl-01", t0())
        .await
        .unwrap();
    assert_eq!(status.state, ModelState::Ready);
    assert_eq!(status.version, Some(1));

    let forecast = restarted
        .get_forecast("BLR001", "wl-01", 7, t0())
        .await
        .unwrap();
    assert_eq!(forecast.model_version, 1);
    assert_eq!(
        fx.models.versions(&key()).await.unwrap(),
        vec![1],
        "restoring from the store must not retrain"
    );
}
