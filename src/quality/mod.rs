//! Quality and anomaly detection over a reading series.
//!
//! Flags implausible or sensor-fault readings before they reach modeling:
//! spikes against a rolling median, flatlined (stuck) sensors, telemetry
//! gaps, and physically impossible values. Anomalies are data, not errors;
//! the detector never fails on malformed input, it classifies it.
//!
//! Rolling spike statistics are computed over quality-passing readings
//! that were not themselves spike-flagged, so a single spike cannot drag
//! the window and cascade into flagging its neighbors.
//!
//! Submodules:
//! - `staleness`: trailing-silence dropout check (needs a clock).

pub mod staleness;

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

use crate::analysis::stats;
use crate::config::QualityConfig;
use crate::model::{AnomalyFlag, AnomalyKind, QualityFlag, Reading, Severity};
use crate::stations::{SensorProfile, StationProfile};

// Rolling spike checks need a few points of context before a deviation
// means anything.
const MIN_SPIKE_BASIS: usize = 3;

/// Maps an exceedance ratio (observed / threshold, ≥ 1 when flagged) onto
/// the fixed severity ladder. The same ladder serves every anomaly kind:
/// deviation/(K·σ) for spikes, gap/(multiple·interval) for dropouts,
/// run/M for flatlines, 1 + overshoot/span for range violations.
pub fn severity_from_exceedance(ratio: f64) -> Severity {
    if ratio <= 1.5 {
        Severity::Low
    } else if ratio <= 3.0 {
        Severity::Medium
    } else {
        Severity::High
    }
}

/// Series-scan anomaly detector. Pure: the only clock it sees is the
/// injected `now`, used to stamp `detected_at`.
#[derive(Debug, Clone)]
pub struct QualityDetector {
    config: QualityConfig,
}

impl QualityDetector {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Scan an ascending-timestamp series and return every anomaly flag,
    /// in input order. Readings the scan excludes from modeling (missing
    /// values, out-of-range) also never enter the rolling spike basis.
    pub fn detect(
        &self,
        series: &[Reading],
        station: &StationProfile,
        sensor: &SensorProfile,
        now: DateTime<Utc>,
    ) -> Vec<AnomalyFlag> {
        let cfg = &self.config;
        let (lower, upper) = station.physical_bounds(sensor);
        let span = upper - lower;
        let expected_secs = f64::from(sensor.expected_interval_minutes) * 60.0;
        let gap_threshold_secs = expected_secs * cfg.gap_multiple;

        let mut flags: Vec<AnomalyFlag> = Vec::new();
        let mut basis: VecDeque<f64> = VecDeque::with_capacity(cfg.spike_window + 1);
        let mut prev_ts: Option<DateTime<Utc>> = None;
        let mut run_anchor: Option<f64> = None;
        let mut run_len: usize = 0;
        let mut run_reported: Option<Severity> = None;

        let make_flag = |timestamp: DateTime<Utc>,
                         kind: AnomalyKind,
                         severity: Severity,
                         observed_value: Option<f64>,
                         detail: String| AnomalyFlag {
            station_id: station.station_id.clone(),
            sensor_id: sensor.sensor_id.clone(),
            timestamp,
            kind,
            severity,
            observed_value,
            detail,
            detected_at: now,
        };

        for reading in series {
            // Telemetry gap against the previous sample, whatever its value.
            if let Some(prev) = prev_ts {
                let gap_secs = (reading.timestamp - prev).num_seconds() as f64;
                if gap_secs > gap_threshold_secs {
                    let ratio = (gap_secs / expected_secs) / cfg.gap_multiple;
                    flags.push(make_flag(
                        reading.timestamp,
                        AnomalyKind::Dropout,
                        severity_from_exceedance(ratio),
                        reading.value,
                        format!(
                            "gap of {:.0} minutes before this reading, expected cadence {} minutes",
                            gap_secs / 60.0,
                            sensor.expected_interval_minutes
                        ),
                    ));
                }
            }
            prev_ts = Some(reading.timestamp);

            let value = match reading.value {
                Some(v) if v.is_finite() => v,
                _ => {
                    flags.push(make_flag(
                        reading.timestamp,
                        AnomalyKind::Dropout,
                        Severity::Low,
                        None,
                        "reading transmitted without a usable value".to_string(),
                    ));
                    run_anchor = None;
                    run_len = 0;
                    run_reported = None;
                    continue;
                }
            };

            if value < lower || value > upper {
                let overshoot = if value < lower { lower - value } else { value - upper };
                let ratio = if span > 0.0 { 1.0 + overshoot / span } else { f64::INFINITY };
                flags.push(make_flag(
                    reading.timestamp,
                    AnomalyKind::OutOfRange,
                    severity_from_exceedance(ratio),
                    Some(value),
                    format!(
                        "value {:.3} {} outside physical range [{:.3}, {:.3}]",
                        value, sensor.unit, lower, upper
                    ),
                ));
                run_anchor = None;
                run_len = 0;
                run_reported = None;
                continue;
            }

            // Flatline run, compared against the run's first value.
            match run_anchor {
                Some(anchor) if (value - anchor).abs() <= cfg.flatline_tolerance => {
                    run_len += 1;
                    if run_len >= cfg.flatline_run {
                        let severity =
                            severity_from_exceedance(run_len as f64 / cfg.flatline_run as f64);
                        let escalated = match run_reported {
                            None => true,
                            Some(reported) => severity > reported,
                        };
                        if escalated {
                            flags.push(make_flag(
                                reading.timestamp,
                                AnomalyKind::Flatline,
                                severity,
                                Some(value),
                                format!(
                                    "{} consecutive readings at {:.3} {}",
                                    run_len, anchor, sensor.unit
                                ),
                            ));
                            run_reported = Some(severity);
                        }
                    }
                }
                _ => {
                    run_anchor = Some(value);
                    run_len = 1;
                    run_reported = None;
                }
            }

            // Spike against the rolling basis.
            let mut is_spike = false;
            if basis.len() >= MIN_SPIKE_BASIS {
                let window: Vec<f64> = basis.iter().copied().collect();
                if let (Some(med), Some(sd)) = (stats::median(&window), stats::std_dev(&window)) {
                    if sd > cfg.sigma_floor {
                        let deviation = (value - med).abs();
                        let threshold = cfg.spike_sigma * sd;
                        if deviation > threshold {
                            is_spike = true;
                            let ratio = deviation / threshold;
                            flags.push(make_flag(
                                reading.timestamp,
                                AnomalyKind::Spike,
                                severity_from_exceedance(ratio),
                                Some(value),
                                format!(
                                    "deviation {:.3} {} from rolling median {:.3} exceeds \
                                     {:.1}-sigma threshold {:.3}",
                                    deviation, sensor.unit, med, cfg.spike_sigma, threshold
                                ),
                            ));
                        }
                    }
                }
            }

            if !is_spike {
                basis.push_back(value);
                if basis.len() > cfg.spike_window {
                    basis.pop_front();
                }
            }
        }

        debug!(
            station_id = %station.station_id,
            sensor_id = %sensor.sensor_id,
            readings = series.len(),
            flags = flags.len(),
            "quality scan complete"
        );
        flags
    }
}

/// The downstream modeling filter: keeps readings that carry a finite value
/// inside the sensor's physical range. Spike- and flatline-flagged readings
/// stay in; the robust estimators downstream absorb suspect values.
pub fn quality_passing(
    series: &[Reading],
    station: &StationProfile,
    sensor: &SensorProfile,
) -> Vec<Reading> {
    let (lower, upper) = station.physical_bounds(sensor);
    series
        .iter()
        .filter(|r| match r.value {
            Some(v) => v.is_finite() && v >= lower && v <= upper,
            None => false,
        })
        .cloned()
        .collect()
}

/// Amend `quality_flag` on the readings a scan flagged. The only mutation
/// of raw readings anywhere in the engine:
/// - missing-value dropouts and range violations become `Rejected`
///   (excluded from modeling);
/// - spikes and flatlines become `Suspect` (still modeled);
/// - gap dropouts reference the reading after the gap, whose value is
///   real, so its flag stays untouched.
pub fn apply_flags(series: &mut [Reading], flags: &[AnomalyFlag]) {
    for flag in flags {
        let downgrade = match flag.kind {
            AnomalyKind::OutOfRange => Some(QualityFlag::Rejected),
            AnomalyKind::Dropout if flag.observed_value.is_none() => Some(QualityFlag::Rejected),
            AnomalyKind::Dropout => None,
            AnomalyKind::Spike | AnomalyKind::Flatline => Some(QualityFlag::Suspect),
        };
        let Some(new_flag) = downgrade else { continue };
        for reading in series.iter_mut() {
            if reading.timestamp == flag.timestamp && reading.sensor_id == flag.sensor_id {
                // Rejected outranks Suspect; never walk a rejection back.
                if !(reading.quality_flag == QualityFlag::Rejected
                    && new_flag == QualityFlag::Suspect)
                {
                    reading.quality_flag = new_flag;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;
    use crate::stations::{AquiferType, SensorKind};
    use chrono::{Duration, TimeZone};

    /// Shallow test well: valid level band [1.0, 30.0] masl, 15-minute
    /// cadence. Roomy enough that mid-band values never trip the range
    /// check.
    fn test_station() -> StationProfile {
        StationProfile {
            station_id: "TST001".to_string(),
            name: "Test Station".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            ground_elevation_m: 30.0,
            well_depth_m: 29.0,
            aquifer_type: AquiferType::Alluvial,
            specific_yield: None,
            influence_area_m2: 1.0e6,
            sensors: vec![SensorProfile {
                sensor_id: "wl-01".to_string(),
                kind: SensorKind::WaterLevel,
                unit: "m".to_string(),
                expected_interval_minutes: 15,
            }],
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn series_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    /// A reading `steps` 15-minute intervals after the series start.
    fn reading_at(steps: i64, value: Option<f64>) -> Reading {
        Reading {
            station_id: "TST001".to_string(),
            sensor_id: "wl-01".to_string(),
            timestamp: series_start() + Duration::minutes(15 * steps),
            value,
            unit: "m".to_string(),
            quality_flag: QualityFlag::Provisional,
        }
    }

    fn evenly_spaced(values: &[f64]) -> Vec<Reading> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| reading_at(i as i64, Some(*v)))
            .collect()
    }

    fn detect(series: &[Reading]) -> Vec<AnomalyFlag> {
        let station = test_station();
        let sensor = station.sensor("wl-01").unwrap().clone();
        QualityDetector::new(QualityConfig::default()).detect(series, &station, &sensor, fixed_now())
    }

    // --- Spike --------------------------------------------------------------

    #[test]
    fn test_jump_against_tight_sigma_is_high_severity_spike() {
        // Ten benign readings with rolling sigma ~0.30 m, then a jump from
        // the 12.5 m band to 25.0 m. Threshold is 3σ ≈ 0.9 m; the ~12.5 m
        // deviation is far past the 9σ tier, so the flag must be High.
        let mut values = vec![12.0, 12.6, 12.3, 12.9, 12.1, 12.7, 12.2, 12.8, 12.4, 12.5];
        values.push(25.0);
        let series = evenly_spaced(&values);

        let flags = detect(&series);
        assert_eq!(flags.len(), 1, "only the jump should be flagged, got {:?}", flags);
        let spike = &flags[0];
        assert_eq!(spike.kind, AnomalyKind::Spike);
        assert_eq!(spike.severity, Severity::High);
        assert_eq!(spike.timestamp, series[10].timestamp, "flag sits on the jump itself");
        assert_eq!(spike.observed_value, Some(25.0));
    }

    #[test]
    fn test_spike_does_not_cascade_onto_neighbors() {
        // The spike is excluded from the rolling basis, so the normal
        // reading after it is judged against unpolluted statistics.
        let values = vec![
            12.0, 12.6, 12.3, 12.9, 12.1, 12.7, 12.2, 12.8, 12.4, 12.5, 25.0, 12.4, 12.6,
        ];
        let flags = detect(&evenly_spaced(&values));
        assert_eq!(
            flags.len(),
            1,
            "readings after the spike should not inherit flags: {:?}",
            flags
        );
        assert_eq!(flags[0].kind, AnomalyKind::Spike);
    }

    #[test]
    fn test_moderate_deviation_gets_lower_severity() {
        // Same basis (σ ≈ 0.30), deviation ~1.25 m ≈ 1.4× the 3σ threshold:
        // inside the first ladder rung, so Low.
        let mut values = vec![12.0, 12.6, 12.3, 12.9, 12.1, 12.7, 12.2, 12.8, 12.4, 12.5];
        values.push(13.7);
        let flags = detect(&evenly_spaced(&values));
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::Spike);
        assert_eq!(flags[0].severity, Severity::Low);
    }

    #[test]
    fn test_no_spike_checks_on_zero_variance_window() {
        // A constant window has σ = 0; the sigma floor must suppress the
        // spike test rather than divide by zero. The step lands as a new
        // flatline anchor, not a spike.
        let values = vec![12.5, 12.5, 12.5, 12.5, 13.0];
        let flags = detect(&evenly_spaced(&values));
        assert!(
            flags.iter().all(|f| f.kind != AnomalyKind::Spike),
            "zero-variance basis must not produce spike flags: {:?}",
            flags
        );
    }

    // --- Flatline -----------------------------------------------------------

    #[test]
    fn test_flatline_flag_emitted_at_fifth_identical_reading() {
        let series = evenly_spaced(&[12.50, 12.50, 12.50, 12.50, 12.50]);
        let flags = detect(&series);
        assert_eq!(flags.len(), 1, "expected exactly one flatline flag, got {:?}", flags);
        let flat = &flags[0];
        assert_eq!(flat.kind, AnomalyKind::Flatline);
        assert_eq!(flat.severity, Severity::Low);
        assert_eq!(
            flat.timestamp, series[4].timestamp,
            "flag belongs to the fifth reading of the run"
        );
    }

    #[test]
    fn test_flatline_escalates_at_severity_tier_crossings() {
        // 16 identical readings: flag at run 5 (Low), run 8 (run/M = 1.6 →
        // Medium), run 16 (3.2 → High). No per-sample spam in between.
        let series = evenly_spaced(&vec![12.50; 16]);
        let flags = detect(&series);
        let flat: Vec<_> = flags.iter().filter(|f| f.kind == AnomalyKind::Flatline).collect();
        assert_eq!(flat.len(), 3, "one flag per tier crossing, got {:?}", flat);
        assert_eq!(flat[0].severity, Severity::Low);
        assert_eq!(flat[0].timestamp, series[4].timestamp);
        assert_eq!(flat[1].severity, Severity::Medium);
        assert_eq!(flat[1].timestamp, series[7].timestamp);
        assert_eq!(flat[2].severity, Severity::High);
        assert_eq!(flat[2].timestamp, series[15].timestamp);
    }

    #[test]
    fn test_four_identical_readings_are_not_a_flatline() {
        let flags = detect(&evenly_spaced(&[12.50, 12.50, 12.50, 12.50]));
        assert!(flags.is_empty(), "below the run threshold nothing fires: {:?}", flags);
    }

    #[test]
    fn test_near_identical_values_within_tolerance_count_as_flat() {
        let series = evenly_spaced(&[12.5, 12.5 + 1e-9, 12.5 - 1e-9, 12.5, 12.5 + 1e-8]);
        let flags = detect(&series);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::Flatline);
    }

    // --- Dropout ------------------------------------------------------------

    #[test]
    fn test_gap_beyond_three_intervals_flags_the_following_reading() {
        // 15-minute cadence, gap threshold 45 minutes. A 75-minute gap is
        // 1.67× the threshold: Medium.
        let mut series = vec![reading_at(0, Some(12.4)), reading_at(1, Some(12.5))];
        let late = Reading {
            timestamp: series[1].timestamp + Duration::minutes(75),
            ..reading_at(0, Some(12.6))
        };
        series.push(late.clone());

        let flags = detect(&series);
        assert_eq!(flags.len(), 1);
        let gap = &flags[0];
        assert_eq!(gap.kind, AnomalyKind::Dropout);
        assert_eq!(gap.severity, Severity::Medium);
        assert_eq!(gap.timestamp, late.timestamp, "flag sits on the reading after the gap");
        assert_eq!(gap.observed_value, Some(12.6), "the late reading's value is real");
    }

    #[test]
    fn test_long_outage_is_high_severity() {
        // A 15-hour silence is 20× the expected cadence, far past the
        // 9× tier.
        let mut series = vec![reading_at(0, Some(12.4))];
        series.push(Reading {
            timestamp: series[0].timestamp + Duration::hours(15),
            ..reading_at(0, Some(12.5))
        });
        let flags = detect(&series);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::Dropout);
        assert_eq!(flags[0].severity, Severity::High);
    }

    #[test]
    fn test_gap_exactly_at_threshold_is_not_flagged() {
        // Strictly-greater semantics: a 45-minute gap at a 45-minute
        // threshold passes.
        let series = vec![reading_at(0, Some(12.4)), reading_at(3, Some(12.5))];
        assert!(detect(&series).is_empty());
    }

    #[test]
    fn test_missing_value_becomes_low_dropout_not_an_error() {
        let series = vec![
            reading_at(0, Some(12.4)),
            reading_at(1, None),
            reading_at(2, Some(12.5)),
        ];
        let flags = detect(&series);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::Dropout);
        assert_eq!(flags[0].severity, Severity::Low);
        assert_eq!(flags[0].observed_value, None);
    }

    #[test]
    fn test_nan_value_treated_as_missing() {
        let series = vec![reading_at(0, Some(12.4)), reading_at(1, Some(f64::NAN))];
        let flags = detect(&series);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::Dropout);
    }

    // --- Out of range -------------------------------------------------------

    #[test]
    fn test_value_outside_well_geometry_is_flagged() {
        // Valid band is [1.0, 30.0]; 0.5 sits just below the well bottom.
        let flags = detect(&evenly_spaced(&[12.4, 0.5]));
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::OutOfRange);
        assert_eq!(flags[0].severity, Severity::Low, "barely past the bound is Low");
    }

    #[test]
    fn test_far_out_of_range_is_high_severity() {
        // 150 m against a 29 m band: overshoot is ~4 spans past the bound.
        let flags = detect(&evenly_spaced(&[12.4, 150.0]));
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::OutOfRange);
        assert_eq!(flags[0].severity, Severity::High);
    }

    #[test]
    fn test_values_on_the_bounds_pass() {
        let flags = detect(&evenly_spaced(&[1.0, 30.0, 12.0]));
        assert!(
            flags.iter().all(|f| f.kind != AnomalyKind::OutOfRange),
            "boundary values are inside the physical range: {:?}",
            flags
        );
    }

    // --- Ordering & filtering ----------------------------------------------

    #[test]
    fn test_flags_come_out_in_timestamp_order() {
        let mut values = vec![12.0, 12.6, 12.3, 12.9, 12.1, 12.7, 12.2, 12.8, 12.4, 12.5];
        values.push(25.0); // spike
        values.push(0.2); // out of range
        let mut series = evenly_spaced(&values);
        series.push(Reading {
            timestamp: series.last().unwrap().timestamp + Duration::hours(4),
            ..reading_at(0, Some(12.5))
        });

        let flags = detect(&series);
        assert!(flags.len() >= 3);
        for pair in flags.windows(2) {
            assert!(
                pair[0].timestamp <= pair[1].timestamp,
                "flags must follow input timestamp order"
            );
        }
    }

    #[test]
    fn test_quality_passing_drops_missing_and_out_of_range_only() {
        let station = test_station();
        let sensor = station.sensor("wl-01").unwrap().clone();
        let series = vec![
            reading_at(0, Some(12.4)),
            reading_at(1, None),         // dropped: missing
            reading_at(2, Some(150.0)),  // dropped: out of range
            reading_at(3, Some(25.0)),   // kept: spike-suspect is still data
            reading_at(4, Some(12.5)),
        ];
        let passing = quality_passing(&series, &station, &sensor);
        let kept: Vec<Option<f64>> = passing.iter().map(|r| r.value).collect();
        assert_eq!(kept, vec![Some(12.4), Some(25.0), Some(12.5)]);
    }

    #[test]
    fn test_apply_flags_amends_only_quality_flags() {
        let mut values = vec![12.0, 12.6, 12.3, 12.9, 12.1, 12.7, 12.2, 12.8, 12.4, 12.5];
        values.push(25.0); // spike → Suspect
        let mut series = evenly_spaced(&values);
        series.push(reading_at(11, None)); // missing → Rejected
        series.push(reading_at(12, Some(150.0))); // out of range → Rejected

        let flags = detect(&series);
        apply_flags(&mut series, &flags);

        assert_eq!(series[10].quality_flag, QualityFlag::Suspect);
        assert_eq!(series[11].quality_flag, QualityFlag::Rejected);
        assert_eq!(series[12].quality_flag, QualityFlag::Rejected);
        assert_eq!(
            series[0].quality_flag,
            QualityFlag::Provisional,
            "unflagged readings keep their ingest flag"
        );
        assert_eq!(series[10].value, Some(25.0), "values are never rewritten");
    }

    #[test]
    fn test_detector_never_panics_on_degenerate_input() {
        let station = test_station();
        let sensor = station.sensor("wl-01").unwrap().clone();
        let detector = QualityDetector::new(QualityConfig::default());

        assert!(detector.detect(&[], &station, &sensor, fixed_now()).is_empty());

        let lone = vec![reading_at(0, Some(12.5))];
        assert!(detector.detect(&lone, &station, &sensor, fixed_now()).is_empty());

        let all_missing = vec![reading_at(0, None), reading_at(1, None)];
        let flags = detector.detect(&all_missing, &station, &sensor, fixed_now());
        assert_eq!(flags.len(), 2, "every missing reading gets its dropout flag");
    }
}
