//! Robust statistics primitives shared by the analysis components.
//!
//! Everything here is a pure function over finite samples; callers filter
//! out missing values first. Non-finite inputs are tolerated (they sort to
//! a stable position) but produce garbage-in-garbage-out results, so the
//! quality filter stays upstream of these.

use std::cmp::Ordering;

/// Sample mean. `None` on an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median by sorted copy; even lengths average the middle pair.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Sample standard deviation (n − 1 denominator). `None` below two points.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Midrank percentile of `x` against `values`, in [0, 1]. Ties contribute
/// half their count, so the minimum of a distribution ranks above 0 and
/// the maximum below 1.
pub fn percentile_rank(values: &[f64], x: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let below = values.iter().filter(|&&v| v < x).count() as f64;
    let equal = values.iter().filter(|&&v| v == x).count() as f64;
    Some((below + 0.5 * equal) / values.len() as f64)
}

/// Theil-Sen slope estimator: the median of all pairwise slopes.
///
/// Robust to outliers that wreck least squares: a single spike moves the
/// median of slopes barely at all. Above `max_points` input points the
/// estimator takes an evenly strided subsample (always keeping the last
/// point) so the O(n²) pair enumeration stays bounded; the stride is a
/// pure function of the length, keeping results deterministic.
///
/// Pairs with coincident x are skipped. `None` when no valid pair exists.
pub fn theil_sen_slope(points: &[(f64, f64)], max_points: usize) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }

    let sampled: Vec<(f64, f64)>;
    let working: &[(f64, f64)] = if points.len() > max_points && max_points >= 2 {
        let stride = points.len().div_ceil(max_points);
        let mut picked: Vec<(f64, f64)> =
            points.iter().step_by(stride).copied().collect();
        let last = points[points.len() - 1];
        if picked.last() != Some(&last) {
            picked.push(last);
        }
        sampled = picked;
        &sampled
    } else {
        points
    };

    let mut slopes = Vec::with_capacity(working.len() * (working.len() - 1) / 2);
    for i in 0..working.len() {
        for j in (i + 1)..working.len() {
            let dx = working[j].0 - working[i].0;
            if dx != 0.0 {
                slopes.push((working[j].1 - working[i].1) / dx);
            }
        }
    }
    median(&slopes)
}

/// Robust intercept paired with a Theil-Sen slope: median of y − slope·x.
pub fn robust_intercept(points: &[(f64, f64)], slope: f64) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let residual_levels: Vec<f64> = points.iter().map(|(x, y)| y - slope * x).collect();
    median(&residual_levels)
}

/// Pearson correlation coefficient between paired samples. `None` below
/// two pairs or when either side has zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
