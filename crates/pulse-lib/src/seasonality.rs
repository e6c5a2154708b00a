//! Seasonal adjustment via multiplicative bucket profiles
//!
//! Each enabled cycle (hour-of-day, weekday, day-of-month) gets a table
//! of factors: bucket mean divided by overall mean. Dividing a value by
//! the combined factor removes the seasonal swing; multiplying an
//! expectation by it puts the swing back.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SeasonalityConfig;
use crate::models::DataPoint;
use crate::stats;

/// Factors are clamped so a sparse bucket can never erase or explode a
/// value.
const FACTOR_MIN: f64 = 0.25;
const FACTOR_MAX: f64 = 4.0;

/// Minimum history span before a day-of-month cycle is considered.
const TWO_MONTHS_MS: i64 = 60 * 24 * 60 * 60 * 1000;

/// Anything that can scale a value by when it was observed.
pub trait SeasonalAdjust: Send + Sync {
    /// Multiplicative factor for the given instant (1.0 means neutral).
    fn adjust(&self, timestamp_ms: i64) -> f64;
}

/// Fitted seasonal factors for one metric. Only cycles whose factors
/// actually moved away from 1.0 are kept; `fit` returns `None` when no
/// cycle clears the strength floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    hourly: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weekday: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    day_of_month: Option<Vec<f64>>,
}

impl SeasonalProfile {
    pub fn fit(points: &[DataPoint], cfg: &SeasonalityConfig) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let overall = stats::mean(&values);
        if overall.abs() < f64::EPSILON {
            return None;
        }

        let hourly = if cfg.daily {
            fit_cycle(points, overall, 24, cfg, |dt| dt.hour() as usize)
        } else {
            None
        };
        let weekday = if cfg.weekly {
            fit_cycle(points, overall, 7, cfg, |dt| {
                dt.weekday().num_days_from_monday() as usize
            })
        } else {
            None
        };
        let day_of_month = if cfg.monthly && spans_two_months(points) {
            fit_cycle(points, overall, 31, cfg, |dt| dt.day0() as usize)
        } else {
            None
        };

        if hourly.is_none() && weekday.is_none() && day_of_month.is_none() {
            return None;
        }
        Some(Self {
            hourly,
            weekday,
            day_of_month,
        })
    }

    /// Divide every point's value by its seasonal factor.
    pub fn deseasonalize(&self, points: &[DataPoint]) -> Vec<DataPoint> {
        points
            .iter()
            .map(|p| DataPoint::new(p.timestamp, p.value / self.adjust(p.timestamp)))
            .collect()
    }
}

impl SeasonalAdjust for SeasonalProfile {
    fn adjust(&self, timestamp_ms: i64) -> f64 {
        let Some(dt) = Utc.timestamp_millis_opt(timestamp_ms).single() else {
            return 1.0;
        };
        let mut factor = 1.0;
        if let Some(hourly) = &self.hourly {
            factor *= hourly[dt.hour() as usize];
        }
        if let Some(weekday) = &self.weekday {
            factor *= weekday[dt.weekday().num_days_from_monday() as usize];
        }
        if let Some(dom) = &self.day_of_month {
            factor *= dom[dt.day0() as usize];
        }
        factor.clamp(FACTOR_MIN, FACTOR_MAX)
    }
}

/// Fit one cycle's factor table. Returns `None` when every factor sits
/// within `min_strength` of neutral.
fn fit_cycle(
    points: &[DataPoint],
    overall_mean: f64,
    buckets: usize,
    cfg: &SeasonalityConfig,
    bucket_of: impl Fn(&DateTime<Utc>) -> usize,
) -> Option<Vec<f64>> {
    let mut sums = vec![0.0; buckets];
    let mut counts = vec![0usize; buckets];
    for p in points {
        let Some(dt) = Utc.timestamp_millis_opt(p.timestamp).single() else {
            continue;
        };
        let b = bucket_of(&dt);
        sums[b] += p.value;
        counts[b] += 1;
    }

    let mut factors = vec![1.0; buckets];
    let mut strength = 0.0f64;
    for b in 0..buckets {
        if counts[b] < cfg.min_samples_per_bucket {
            continue;
        }
        let bucket_mean = sums[b] / counts[b] as f64;
        let f = (bucket_mean / overall_mean).clamp(FACTOR_MIN, FACTOR_MAX);
        strength = strength.max((f - 1.0).abs());
        factors[b] = f;
    }

    if strength < cfg.min_strength {
        return None;
    }
    Some(factors)
}

fn spans_two_months(points: &[DataPoint]) -> bool {
    let min = points.iter().map(|p| p.timestamp).min().unwrap_or(0);
    let max = points.iter().map(|p| p.timestamp).max().unwrap_or(0);
    max - min >= TWO_MONTHS_MS
}
