//! Baseline fitting
//!
//! Turns a metric's raw history into a [`Baseline`] summary via one of
//! four estimators, with optional outlier trimming, gap filling and
//! seasonal adjustment applied first.

use tracing::{debug, info};

use crate::config::{BaselineConfig, BaselineMethod, SeasonalityConfig};
use crate::error::{EmptyInputError, PulseError};
use crate::models::{Baseline, DataPoint, Percentiles};
use crate::observability::PipelineMetrics;
use crate::seasonality::SeasonalProfile;
use crate::stats;
use crate::store::MetricStore;

/// Rescales an interquartile range to a normal-equivalent sigma.
const IQR_TO_SIGMA: f64 = 1.35;
/// Rescales a median absolute deviation to a normal-equivalent sigma.
const MAD_TO_SIGMA: f64 = 1.4826;

/// A fitted baseline together with the seasonal profile (if any) that
/// was removed from the series before estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineFit {
    pub baseline: Baseline,
    pub profile: Option<SeasonalProfile>,
}

/// Fits baselines according to a [`BaselineConfig`].
#[derive(Debug, Clone)]
pub struct BaselineBuilder {
    config: BaselineConfig,
    seasonality: SeasonalityConfig,
}

impl BaselineBuilder {
    pub fn new(config: BaselineConfig) -> Self {
        Self {
            config,
            seasonality: SeasonalityConfig::default(),
        }
    }

    pub fn with_seasonality(mut self, seasonality: SeasonalityConfig) -> Self {
        self.seasonality = seasonality;
        self
    }

    /// Fit a baseline from raw history. Fails only on empty input; a
    /// single point yields a degenerate but honest baseline (zero
    /// deviation, `sample_count` 1).
    pub fn build(&self, points: &[DataPoint]) -> Result<BaselineFit, EmptyInputError> {
        if points.is_empty() {
            return Err(EmptyInputError);
        }

        let mut working = points.to_vec();
        working.sort_by_key(|p| p.timestamp);

        if self.config.preprocess.fill_gaps {
            working = stats::fill_gaps(&working);
        }
        if self.config.preprocess.exclude_outliers {
            let trimmed = stats::trim_outliers(&working, self.config.preprocess.outlier_sigma);
            if !trimmed.is_empty() {
                working = trimmed;
            }
        }

        let profile = if self.config.seasonal {
            SeasonalProfile::fit(&working, &self.seasonality)
        } else {
            None
        };
        if let Some(profile) = &profile {
            working = profile.deseasonalize(&working);
        }

        let values: Vec<f64> = working.iter().map(|p| p.value).collect();
        let (mean, std_dev, min, max) = self.estimate(&values);

        let baseline = Baseline {
            mean,
            std_dev: std_dev.max(0.0),
            min,
            max,
            sample_count: values.len(),
            period: self.config.period.clone(),
            last_updated: chrono::Utc::now().timestamp_millis(),
            percentiles: Some(Percentiles {
                p5: stats::percentile(&values, 5.0),
                p25: stats::percentile(&values, 25.0),
                p50: stats::percentile(&values, 50.0),
                p75: stats::percentile(&values, 75.0),
                p95: stats::percentile(&values, 95.0),
            }),
        };
        Ok(BaselineFit { baseline, profile })
    }

    /// Fit and persist. A metric whose new fit has no seasonal profile
    /// also has any previously stored profile removed, so detection
    /// never applies stale factors.
    pub async fn build_and_store(
        &self,
        metric: &str,
        points: &[DataPoint],
        store: &dyn MetricStore,
    ) -> Result<Baseline, PulseError> {
        let fit = self.build(points)?;
        store.save_baseline(metric, fit.baseline.clone()).await?;
        match fit.profile {
            Some(profile) => store.save_profile(metric, profile).await?,
            None => store.clear_profile(metric).await?,
        }
        PipelineMetrics::new().inc_baselines_built();
        info!(
            event = "baseline_built",
            metric,
            method = %self.config.method,
            samples = fit.baseline.sample_count,
            mean = fit.baseline.mean,
            std_dev = fit.baseline.std_dev,
            "baseline rebuilt"
        );
        Ok(fit.baseline)
    }

    /// (mean, std_dev, min, max) per the configured estimator. `values`
    /// is non-empty and time-ordered.
    fn estimate(&self, values: &[f64]) -> (f64, f64, f64, f64) {
        match self.config.method {
            BaselineMethod::MovingAverage => {
                let tail_start = values.len().saturating_sub(self.config.window_size);
                let tail = &values[tail_start..];
                (
                    stats::mean(tail),
                    stats::std_dev(tail),
                    fold_min(tail),
                    fold_max(tail),
                )
            }
            BaselineMethod::ExponentialSmoothing => {
                let alpha = self.config.smoothing_alpha;
                let mut level = values[0];
                let mut var = 0.0;
                for &v in &values[1..] {
                    let diff = v - level;
                    let incr = alpha * diff;
                    level += incr;
                    var = (1.0 - alpha) * (var + diff * incr);
                }
                (level, var.max(0.0).sqrt(), fold_min(values), fold_max(values))
            }
            BaselineMethod::Percentile => {
                let (q1, q2, q3) = stats::quartiles(values);
                debug!(q1, q2, q3, "percentile estimate");
                (
                    q2,
                    (q3 - q1) / IQR_TO_SIGMA,
                    stats::percentile(values, 5.0),
                    stats::percentile(values, 95.0),
                )
            }
            BaselineMethod::Median => (
                stats::median(values),
                stats::mad(values) * MAD_TO_SIGMA,
                fold_min(values),
                fold_max(values),
            ),
        }
    }
}

fn fold_min(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn fold_max(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}
