//! Pipeline configuration
//!
//! Every section deserializes with full defaults so an empty source
//! yields a working configuration. `PipelineConfig::load` reads
//! overrides from `PULSE_`-prefixed environment variables.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::algorithms::AlgorithmKind;
use crate::error::PulseError;
use crate::models::SeverityLevel;

/// How aggressively the ensemble flags deviations. Thresholds loosen as
/// sensitivity drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Sensitivity {
    /// Z-score / modified z-score flag threshold, in sigmas.
    pub fn zscore_threshold(self) -> f64 {
        match self {
            Sensitivity::Low => 3.5,
            Sensitivity::Medium => 3.0,
            Sensitivity::High => 2.5,
        }
    }

    /// Multiplier `k` for the IQR fences `Q1 - k*IQR` / `Q3 + k*IQR`.
    pub fn iqr_multiplier(self) -> f64 {
        match self {
            Sensitivity::Low => 2.0,
            Sensitivity::Medium => 1.5,
            Sensitivity::High => 1.2,
        }
    }

    /// Band width around the moving average, in rolling sigmas.
    pub fn band_multiplier(self) -> f64 {
        match self {
            Sensitivity::Low => 3.5,
            Sensitivity::Medium => 3.0,
            Sensitivity::High => 2.5,
        }
    }

    /// Minimum flakiness score (alternation ratio) that flags a case.
    pub fn flakiness_threshold(self) -> f64 {
        match self {
            Sensitivity::Low => 0.4,
            Sensitivity::Medium => 0.3,
            Sensitivity::High => 0.25,
        }
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Medium
    }
}

/// Which algorithms run and how much history they need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enabled: bool,
    /// Algorithms participating in the ensemble. Empty means numeric
    /// detection always reports "no anomaly".
    pub algorithms: BTreeSet<AlgorithmKind>,
    pub sensitivity: Sensitivity,
    /// Below this many history points detection abstains entirely.
    pub min_data_points: usize,
    /// History horizon used when fetching points for detection.
    pub detection_window_days: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithms: AlgorithmKind::all(),
            sensitivity: Sensitivity::default(),
            min_data_points: 10,
            detection_window_days: 30,
        }
    }
}

/// Cleanup applied to raw history before a baseline fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub exclude_outliers: bool,
    /// Points beyond this many sigmas from the mean are dropped.
    pub outlier_sigma: f64,
    pub fill_gaps: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            exclude_outliers: true,
            outlier_sigma: 3.0,
            fill_gaps: false,
        }
    }
}

/// Estimator used to turn history into a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMethod {
    MovingAverage,
    ExponentialSmoothing,
    Percentile,
    Median,
}

impl Default for BaselineMethod {
    fn default() -> Self {
        BaselineMethod::MovingAverage
    }
}

impl std::fmt::Display for BaselineMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BaselineMethod::MovingAverage => "moving_average",
            BaselineMethod::ExponentialSmoothing => "exponential_smoothing",
            BaselineMethod::Percentile => "percentile",
            BaselineMethod::Median => "median",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub method: BaselineMethod,
    /// Tail length for the moving-average estimator.
    pub window_size: usize,
    /// EWMA smoothing factor, in (0, 1].
    pub smoothing_alpha: f64,
    pub preprocess: PreprocessConfig,
    /// Fit a seasonal profile alongside the baseline.
    pub seasonal: bool,
    /// Label stored on the baseline describing its window.
    pub period: String,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            method: BaselineMethod::default(),
            window_size: 50,
            smoothing_alpha: 0.3,
            preprocess: PreprocessConfig::default(),
            seasonal: false,
            period: "30d".to_string(),
        }
    }
}

/// Alert orchestration windows, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    /// Anomalies below this severity never produce alerts.
    pub min_severity: SeverityLevel,
    pub deduplication_window_ms: u64,
    pub convergence_window_ms: u64,
    /// Alerts allowed per convergence group before the group converges.
    pub max_alerts_per_window: usize,
    pub cooldown_period_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_severity: SeverityLevel::Low,
            deduplication_window_ms: 5 * 60 * 1000,
            convergence_window_ms: 15 * 60 * 1000,
            max_alerts_per_window: 5,
            cooldown_period_ms: 30 * 60 * 1000,
        }
    }
}

/// Relative weight of each severity factor. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub deviation: f64,
    pub duration: f64,
    pub frequency: f64,
    pub scope: f64,
}

impl SeverityWeights {
    pub fn sum(&self) -> f64 {
        self.deviation + self.duration + self.frequency + self.scope
    }
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            deviation: 0.40,
            duration: 0.20,
            frequency: 0.15,
            scope: 0.25,
        }
    }
}

/// Which seasonal cycles a profile models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalityConfig {
    /// Hour-of-day buckets (24).
    pub daily: bool,
    /// Weekday buckets (7).
    pub weekly: bool,
    /// Day-of-month buckets (31); only fit when the history spans at
    /// least two months.
    pub monthly: bool,
    /// Buckets with fewer samples keep a neutral factor of 1.0.
    pub min_samples_per_bucket: usize,
    /// Cycles whose factors stay within this distance of 1.0 are
    /// discarded as noise.
    pub min_strength: f64,
}

impl Default for SeasonalityConfig {
    fn default() -> Self {
        Self {
            daily: true,
            weekly: true,
            monthly: false,
            min_samples_per_bucket: 3,
            min_strength: 0.05,
        }
    }
}

/// Root configuration for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub baseline: BaselineConfig,
    pub alerts: AlertConfig,
    pub severity_weights: SeverityWeights,
    pub seasonality: SeasonalityConfig,
}

impl PipelineConfig {
    /// Load configuration from the environment. Variables use the
    /// `PULSE_` prefix with `__` separating nesting levels, e.g.
    /// `PULSE_DETECTION__MIN_DATA_POINTS=20`.
    pub fn load() -> Result<Self, PulseError> {
        let source = config::Config::builder()
            .add_source(config::Environment::with_prefix("PULSE").separator("__"))
            .build()
            .map_err(|e| PulseError::InvalidConfig(e.to_string()))?;
        let cfg: PipelineConfig = source
            .try_deserialize()
            .map_err(|e| PulseError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that would make the pipeline silently
    /// misbehave rather than fail.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.detection.min_data_points == 0 {
            return Err(PulseError::InvalidConfig(
                "detection.min_data_points must be at least 1".to_string(),
            ));
        }
        if self.baseline.window_size == 0 {
            return Err(PulseError::InvalidConfig(
                "baseline.window_size must be at least 1".to_string(),
            ));
        }
        if !(self.baseline.smoothing_alpha > 0.0 && self.baseline.smoothing_alpha <= 1.0) {
            return Err(PulseError::InvalidConfig(format!(
                "baseline.smoothing_alpha must be in (0, 1], got {}",
                self.baseline.smoothing_alpha
            )));
        }
        if self.baseline.preprocess.outlier_sigma <= 0.0 {
            return Err(PulseError::InvalidConfig(format!(
                "baseline.preprocess.outlier_sigma must be positive, got {}",
                self.baseline.preprocess.outlier_sigma
            )));
        }
        if self.alerts.max_alerts_per_window == 0 {
            return Err(PulseError::InvalidConfig(
                "alerts.max_alerts_per_window must be at least 1".to_string(),
            ));
        }
        let weights = &self.severity_weights;
        for (name, w) in [
            ("deviation", weights.deviation),
            ("duration", weights.duration),
            ("frequency", weights.frequency),
            ("scope", weights.scope),
        ] {
            if w < 0.0 {
                return Err(PulseError::InvalidConfig(format!(
                    "severity_weights.{} must not be negative, got {}",
                    name, w
                )));
            }
        }
        if (weights.sum() - 1.0).abs() > 1e-3 {
            return Err(PulseError::InvalidConfig(format!(
                "severity weights must sum to 1.0, got {:.4}",
                weights.sum()
            )));
        }
        Ok(())
    }
}
