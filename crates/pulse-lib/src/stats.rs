//! Shared statistical helpers
//!
//! Scalar summaries return 0.0 on empty input so callers can gate on
//! sample counts instead of unwrapping options everywhere.

use crate::models::DataPoint;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (Bessel-corrected). Zero for fewer than
/// two points.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation, unscaled.
pub fn mad(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

/// Percentile in [0, 100] with linear interpolation between ranks.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// (Q1, median, Q3).
pub fn quartiles(values: &[f64]) -> (f64, f64, f64) {
    (
        percentile(values, 25.0),
        percentile(values, 50.0),
        percentile(values, 75.0),
    )
}

/// Drop points further than `sigma` standard deviations from the mean.
/// A flat series (zero deviation) is returned untouched so constant
/// metrics never lose data.
pub fn trim_outliers(points: &[DataPoint], sigma: f64) -> Vec<DataPoint> {
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let m = mean(&values);
    let sd = std_dev(&values);
    if sd == 0.0 || !sd.is_finite() {
        return points.to_vec();
    }
    points
        .iter()
        .copied()
        .filter(|p| ((p.value - m) / sd).abs() <= sigma)
        .collect()
}

/// Fill irregular sampling gaps by linear interpolation.
///
/// The expected cadence is the median interval between consecutive
/// points; any gap wider than twice that cadence gets synthetic points
/// inserted at cadence steps. Output is sorted by timestamp.
pub fn fill_gaps(points: &[DataPoint]) -> Vec<DataPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.timestamp);

    let intervals: Vec<f64> = sorted
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp) as f64)
        .collect();
    let step = median(&intervals);
    if step <= 0.0 {
        return sorted;
    }

    let mut out = Vec::with_capacity(sorted.len());
    for w in sorted.windows(2) {
        let (prev, next) = (w[0], w[1]);
        out.push(prev);
        let gap = (next.timestamp - prev.timestamp) as f64;
        if gap <= 2.0 * step {
            continue;
        }
        let span = next.value - prev.value;
        let mut t = prev.timestamp as f64 + step;
        // Stop half a step short of the real point so we never mint a
        // near-duplicate of it.
        while t < next.timestamp as f64 - step / 2.0 {
            let frac = (t - prev.timestamp as f64) / gap;
            out.push(DataPoint::new(t.round() as i64, prev.value + span * frac));
            t += step;
        }
    }
    if let Some(last) = sorted.last() {
        out.push(*last);
    }
    out
}
