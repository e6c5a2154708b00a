//! Core data models for the detection pipeline

use serde::{Deserialize, Serialize};

/// One scalar observation of a metric. Immutable, produced externally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Percentile summary attached to a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Statistical summary describing "normal" for one metric.
///
/// One baseline exists per metric name; a rebuild overwrites the whole
/// record, it is never partially mutated. `sample_count` is always
/// non-zero: the builder fails on empty input instead of producing a
/// hollow baseline, and `std_dev` is never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub sample_count: usize,
    /// Label describing the fitting window, e.g. "30d".
    pub period: String,
    /// Epoch milliseconds of the rebuild.
    pub last_updated: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<Percentiles>,
}

/// Classification of what kind of misbehavior an anomaly represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    DurationSpike,
    PerformanceDegradation,
    FailureSpike,
    SuccessRateDrop,
    TrendChange,
    ResourceAnomaly,
    FlakyPattern,
    SeasonalDeviation,
}

impl AnomalyType {
    /// Human-readable label used in alert titles.
    pub fn label(&self) -> &'static str {
        match self {
            AnomalyType::DurationSpike => "Duration spike",
            AnomalyType::PerformanceDegradation => "Performance degradation",
            AnomalyType::FailureSpike => "Failure spike",
            AnomalyType::SuccessRateDrop => "Success rate drop",
            AnomalyType::TrendChange => "Trend change",
            AnomalyType::ResourceAnomaly => "Resource anomaly",
            AnomalyType::FlakyPattern => "Flaky pattern",
            AnomalyType::SeasonalDeviation => "Seasonal deviation",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnomalyType::DurationSpike => "duration_spike",
            AnomalyType::PerformanceDegradation => "performance_degradation",
            AnomalyType::FailureSpike => "failure_spike",
            AnomalyType::SuccessRateDrop => "success_rate_drop",
            AnomalyType::TrendChange => "trend_change",
            AnomalyType::ResourceAnomaly => "resource_anomaly",
            AnomalyType::FlakyPattern => "flaky_pattern",
            AnomalyType::SeasonalDeviation => "seasonal_deviation",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle state of an anomaly. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    New,
    Acknowledged,
    Investigating,
    Resolved,
}

impl AnomalyStatus {
    fn rank(self) -> u8 {
        match self {
            AnomalyStatus::New => 0,
            AnomalyStatus::Acknowledged => 1,
            AnomalyStatus::Investigating => 2,
            AnomalyStatus::Resolved => 3,
        }
    }

    /// Transitions only move forward; re-entering the current state is a
    /// permitted no-op (acknowledging twice, resolving twice).
    pub fn can_transition_to(self, next: AnomalyStatus) -> bool {
        next.rank() >= self.rank()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AnomalyStatus::Resolved)
    }
}

impl std::fmt::Display for AnomalyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnomalyStatus::New => "new",
            AnomalyStatus::Acknowledged => "acknowledged",
            AnomalyStatus::Investigating => "investigating",
            AnomalyStatus::Resolved => "resolved",
        };
        write!(f, "{}", s)
    }
}

/// Severity buckets, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityLevel {
    /// High and Critical anomalies escalate a suite status to Critical.
    pub fn is_urgent(self) -> bool {
        matches!(self, SeverityLevel::High | SeverityLevel::Critical)
    }
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SeverityLevel::Low => "low",
            SeverityLevel::Medium => "medium",
            SeverityLevel::High => "high",
            SeverityLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Explanation attached to an anomaly by the external root-cause
/// analyzer. The pipeline only ever appends and reads these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    /// Coarse bucket ("environment", "code_change", "infrastructure", ...).
    pub category: String,
    pub summary: String,
    /// Analyzer confidence, 0.0-1.0.
    pub confidence: f64,
}

/// A detected deviation from baseline behavior for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Format `anomaly-{metric}-{suffix}`; the first two `-`-separated
    /// segments identify the metric and feed the alert dedup key.
    pub id: String,
    pub anomaly_type: AnomalyType,
    pub severity: SeverityLevel,
    /// Severity score, clamped to 0-100.
    pub score: f64,
    pub status: AnomalyStatus,
    /// Epoch milliseconds.
    pub detected_at: i64,
    pub metric_name: String,
    pub current_value: f64,
    pub expected_value: f64,
    /// Signed, in the primary algorithm's units (sigmas, IQR units, ...).
    pub deviation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    pub description: String,
    pub root_causes: Vec<RootCause>,
}

impl Anomaly {
    /// Apply a status transition, rejecting backwards moves. Re-entering
    /// the current state is accepted and changes nothing.
    pub fn transition_to(&mut self, next: AnomalyStatus) -> Result<(), crate::error::PulseError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::error::PulseError::InvalidConfig(format!(
                "anomaly {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Append-only enrichment from the root-cause analyzer.
    pub fn add_root_cause(&mut self, cause: RootCause) {
        self.root_causes.push(cause);
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Generate a fresh anomaly id for a metric.
///
/// Dashes and spaces in the metric name are folded to underscores so the
/// id always splits into `anomaly`, `{metric}`, `{suffix}` — downstream
/// alert deduplication keys off the first two segments.
pub fn new_anomaly_id(metric: &str) -> String {
    let sanitized: String = metric
        .chars()
        .map(|c| if c == '-' || c.is_whitespace() { '_' } else { c })
        .collect();
    format!("anomaly-{}-{}", sanitized, unique_suffix())
}

/// Timestamp-plus-sequence suffix for record ids. Unique within a
/// process even when ids are minted in the same nanosecond.
pub(crate) fn unique_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}{:x}{:x}", now.as_secs(), now.subsec_nanos(), seq)
}

/// Notification level of a rendered alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// A rendered, human-readable alert.
///
/// Immutable once created except for the acknowledgement fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub id: String,
    pub anomaly_id: String,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<i64>,
}

impl AnomalyAlert {
    /// Mark the alert acknowledged. Idempotent: a second call leaves the
    /// original acknowledgement timestamp in place.
    pub fn acknowledge(&mut self, now_ms: i64) {
        if !self.acknowledged {
            self.acknowledged = true;
            self.acknowledged_at = Some(now_ms);
        }
    }
}

/// One observation of the suite-level health score (0-100), produced by
/// the external health scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    pub score: f64,
    /// Epoch milliseconds.
    pub computed_at: i64,
}

/// Batch-detection input: one metric reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: String,
    pub value: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// One execution of a test case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaseRun {
    pub passed: bool,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Time-ordered run history for a single test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseHistory {
    pub case_id: String,
    pub runs: Vec<CaseRun>,
}

/// Aggregate verdict for a batch of metrics or cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteStatus {
    Normal,
    Warning,
    Critical,
}

impl std::fmt::Display for SuiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SuiteStatus::Normal => "normal",
            SuiteStatus::Warning => "warning",
            SuiteStatus::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}
