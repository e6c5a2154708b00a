//! Ensemble anomaly detection
//!
//! Runs the configured algorithms against one (value, baseline) pair,
//! reconciles their verdicts into a single decision, classifies the
//! anomaly, scores it and persists it. Pattern analysis over per-case
//! run histories shares the same lifecycle but skips the numeric
//! ensemble.
//!
//! Disabled detection and thin history are sentinel results, not
//! errors; a failing store aborts the call instead of pretending the
//! metric is healthy.

use std::sync::Arc;
use std::time::Instant;

use crate::algorithms::{
    patterns, Algorithm, AlgorithmKind, DetectionContext, Verdict,
};
use crate::config::DetectionConfig;
use crate::error::PulseError;
use crate::models::{
    new_anomaly_id, Anomaly, AnomalyStatus, AnomalyType, CaseHistory, CaseRun, MetricSample,
    RootCause, SuiteStatus,
};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::seasonality::SeasonalAdjust;
use crate::severity::{SeverityEvaluator, SeverityInput};
use crate::stats;
use crate::store::MetricStore;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
/// A resolved anomaly younger than this marks a re-detection as a
/// regression.
const REGRESSION_LOOKBACK_MS: i64 = 7 * DAY_MS;

/// Where a detection verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// Detection disabled, or no algorithm produced a verdict.
    None,
    /// Not enough history to judge anything. Consumers must branch on
    /// this before reading the other fields.
    InsufficientData,
    Algorithm(AlgorithmKind),
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalSource::None => write!(f, "none"),
            SignalSource::InsufficientData => write!(f, "insufficient_data"),
            SignalSource::Algorithm(kind) => write!(f, "{}", kind),
        }
    }
}

/// Outcome of one detection pass over a single metric value.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub metric: String,
    pub is_anomaly: bool,
    pub signal: SignalSource,
    /// Signed deviation in the primary algorithm's units. Diagnostic
    /// only when `is_anomaly` is false.
    pub deviation: f64,
    /// What the primary algorithm expected, re-seasonalized.
    pub expected: f64,
    pub anomaly: Option<Anomaly>,
}

impl DetectionResult {
    fn quiet(metric: &str, signal: SignalSource, value: f64) -> Self {
        Self {
            metric: metric.to_string(),
            is_anomaly: false,
            signal,
            deviation: 0.0,
            expected: value,
            anomaly: None,
        }
    }
}

/// Batch detection over many metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub status: SuiteStatus,
    pub results: Vec<DetectionResult>,
}

impl BatchOutcome {
    pub fn anomalies(&self) -> impl Iterator<Item = &Anomaly> {
        self.results.iter().filter_map(|r| r.anomaly.as_ref())
    }
}

/// Pattern scan over many test cases.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseScan {
    pub status: SuiteStatus,
    pub anomalies: Vec<Anomaly>,
}

/// Orchestrates the algorithm ensemble against the persisted baselines.
///
/// Detection and scoring are stateless; concurrent calls for different
/// metrics are independent, and concurrent calls for the same metric
/// each persist their own anomaly row. Downstream alert deduplication
/// collapses those duplicates.
pub struct AnomalyDetector {
    store: Arc<dyn MetricStore>,
    evaluator: SeverityEvaluator,
    logger: StructuredLogger,
    metrics: PipelineMetrics,
}

impl AnomalyDetector {
    pub fn new(store: Arc<dyn MetricStore>, evaluator: SeverityEvaluator) -> Self {
        Self {
            store,
            evaluator,
            logger: StructuredLogger::new("pulse"),
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Judge one metric value against its baseline and history.
    ///
    /// `history` overrides the store's recorded history when supplied;
    /// values are taken as already comparable to the baseline (the
    /// store path deseasonalizes per point, an override is used as-is).
    pub async fn detect(
        &self,
        metric: &str,
        value: f64,
        timestamp: i64,
        config: &DetectionConfig,
        history: Option<&[f64]>,
    ) -> Result<DetectionResult, PulseError> {
        if !config.enabled {
            return Ok(DetectionResult::quiet(metric, SignalSource::None, value));
        }
        let started = Instant::now();
        self.metrics.inc_detections();

        let baseline = self.store.baseline(metric).await?;
        let profile = self.store.profile(metric).await?;

        let history_values: Vec<f64> = match history {
            Some(values) => values.to_vec(),
            None => {
                let since = timestamp - config.detection_window_days as i64 * DAY_MS;
                let points = self.store.history(metric, since).await?;
                match &profile {
                    Some(p) => points
                        .iter()
                        .map(|pt| pt.value / p.adjust(pt.timestamp))
                        .collect(),
                    None => points.iter().map(|pt| pt.value).collect(),
                }
            }
        };

        if baseline.is_none() && history_values.len() < config.min_data_points {
            return Ok(DetectionResult::quiet(
                metric,
                SignalSource::InsufficientData,
                value,
            ));
        }

        let adjustment = profile
            .as_ref()
            .map_or(1.0, |p| p.adjust(timestamp));
        let adjusted_value = value / adjustment;

        // A metric without a stored baseline but with enough history
        // gets an on-the-fly summary so the ensemble can still run.
        let baseline = match baseline {
            Some(b) => b,
            None => synthesize_baseline(&history_values, timestamp),
        };

        let ctx = DetectionContext {
            value: adjusted_value,
            history: &history_values,
            baseline: &baseline,
            sensitivity: config.sensitivity,
        };
        let verdicts: Vec<Verdict> = Algorithm::ensemble(&config.algorithms)
            .iter()
            .filter_map(|a| a.evaluate(&ctx))
            .collect();
        self.metrics
            .observe_detection_latency(started.elapsed().as_secs_f64());

        let Some(primary) = pick_primary(&verdicts) else {
            // Every algorithm abstained or none flagged: report the
            // first opinion (if any) for diagnostics.
            let (signal, deviation, expected) = match verdicts.first() {
                Some(v) => (
                    SignalSource::Algorithm(v.kind),
                    v.deviation,
                    v.expected * adjustment,
                ),
                None => (SignalSource::None, 0.0, value),
            };
            return Ok(DetectionResult {
                metric: metric.to_string(),
                is_anomaly: false,
                signal,
                deviation,
                expected,
                anomaly: None,
            });
        };

        let anomaly_type = classify(metric, primary.deviation);
        let (regression, frequency) = self.recurrence(metric, timestamp, config).await?;
        let duration_ms = self.condition_age(metric, timestamp).await?;

        let severity_input = SeverityInput {
            anomaly_type,
            deviation_sigmas: primary.deviation.abs(),
            duration_ms,
            frequency,
            affected_ratio: None,
            regression,
            consecutive_failures: 0,
        };
        let scored = self.evaluator.evaluate(&severity_input);

        let anomaly = Anomaly {
            id: new_anomaly_id(metric),
            anomaly_type,
            severity: scored.severity,
            score: scored.score,
            status: AnomalyStatus::New,
            detected_at: timestamp,
            metric_name: metric.to_string(),
            current_value: value,
            expected_value: primary.expected * adjustment,
            deviation: primary.deviation,
            case_id: None,
            description: primary.detail.clone(),
            root_causes: Vec::new(),
        };
        self.store.save_anomaly(anomaly.clone()).await?;
        self.metrics.inc_anomalies_detected();
        self.logger.log_anomaly(
            metric,
            anomaly_type,
            scored.severity,
            scored.score,
            primary.deviation,
            &primary.detail,
        );

        Ok(DetectionResult {
            metric: metric.to_string(),
            is_anomaly: true,
            signal: SignalSource::Algorithm(primary.kind),
            deviation: primary.deviation,
            expected: anomaly.expected_value,
            anomaly: Some(anomaly),
        })
    }

    /// Fan `detect` out over a batch of samples and roll the verdicts
    /// up into one suite status.
    pub async fn detect_batch(
        &self,
        samples: &[MetricSample],
        config: &DetectionConfig,
    ) -> Result<BatchOutcome, PulseError> {
        let mut results = Vec::with_capacity(samples.len());
        for sample in samples {
            results.push(
                self.detect(&sample.metric, sample.value, sample.timestamp, config, None)
                    .await?,
            );
        }
        let status = roll_up(results.iter().filter_map(|r| r.anomaly.as_ref()));
        Ok(BatchOutcome { status, results })
    }

    /// Pattern analysis for one test case: trailing failure streaks and
    /// pass/fail flapping. Emitted anomalies carry the case id and a
    /// synthetic metric name, and persist like any other.
    pub async fn detect_case_patterns(
        &self,
        case_id: &str,
        runs: &[CaseRun],
        config: &DetectionConfig,
    ) -> Result<Vec<Anomaly>, PulseError> {
        if !config.enabled || !config.algorithms.contains(&AlgorithmKind::Patterns) {
            return Ok(Vec::new());
        }
        let signals = patterns::evaluate_case(runs, config.sensitivity);
        if signals.is_empty() {
            return Ok(Vec::new());
        }

        let metric = format!("case::{}::failures", case_id);
        let timestamp = runs
            .iter()
            .map(|r| r.timestamp)
            .max()
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let (regression, frequency) = self.recurrence(&metric, timestamp, config).await?;

        let mut anomalies = Vec::with_capacity(signals.len());
        for signal in signals {
            let streak = match signal.anomaly_type {
                AnomalyType::FailureSpike => signal.deviation as usize,
                _ => 0,
            };
            let scored = self.evaluator.evaluate(&SeverityInput {
                anomaly_type: signal.anomaly_type,
                deviation_sigmas: signal.deviation,
                duration_ms: 0,
                frequency,
                affected_ratio: None,
                regression,
                consecutive_failures: streak,
            });
            let description = format!("Case {} {}.", case_id, signal.detail);
            let anomaly = Anomaly {
                id: new_anomaly_id(&metric),
                anomaly_type: signal.anomaly_type,
                severity: scored.severity,
                score: scored.score,
                status: AnomalyStatus::New,
                detected_at: timestamp,
                metric_name: metric.clone(),
                current_value: signal.deviation,
                expected_value: 0.0,
                deviation: signal.deviation,
                case_id: Some(case_id.to_string()),
                description: description.clone(),
                root_causes: Vec::new(),
            };
            self.store.save_anomaly(anomaly.clone()).await?;
            self.metrics.inc_anomalies_detected();
            self.logger.log_anomaly(
                &metric,
                signal.anomaly_type,
                scored.severity,
                scored.score,
                signal.deviation,
                &description,
            );
            anomalies.push(anomaly);
        }
        Ok(anomalies)
    }

    /// Pattern scan over many cases with a suite roll-up.
    pub async fn detect_for_cases(
        &self,
        cases: &[CaseHistory],
        config: &DetectionConfig,
    ) -> Result<CaseScan, PulseError> {
        let mut anomalies = Vec::new();
        for case in cases {
            anomalies.extend(
                self.detect_case_patterns(&case.case_id, &case.runs, config)
                    .await?,
            );
        }
        let status = roll_up(anomalies.iter());
        Ok(CaseScan { status, anomalies })
    }

    pub async fn acknowledge_anomaly(&self, id: &str) -> Result<Anomaly, PulseError> {
        self.transition(id, AnomalyStatus::Acknowledged).await
    }

    pub async fn start_investigation(&self, id: &str) -> Result<Anomaly, PulseError> {
        self.transition(id, AnomalyStatus::Investigating).await
    }

    /// Resolve terminally. Resolving twice is a no-op.
    pub async fn resolve_anomaly(&self, id: &str) -> Result<Anomaly, PulseError> {
        self.transition(id, AnomalyStatus::Resolved).await
    }

    /// Attach an externally produced root cause. Append-only.
    pub async fn add_root_cause(&self, id: &str, cause: RootCause) -> Result<Anomaly, PulseError> {
        let mut anomaly = self.fetch(id).await?;
        anomaly.add_root_cause(cause);
        self.store.save_anomaly(anomaly.clone()).await?;
        Ok(anomaly)
    }

    async fn transition(&self, id: &str, next: AnomalyStatus) -> Result<Anomaly, PulseError> {
        let mut anomaly = self.fetch(id).await?;
        anomaly.transition_to(next)?;
        self.store.save_anomaly(anomaly.clone()).await?;
        Ok(anomaly)
    }

    async fn fetch(&self, id: &str) -> Result<Anomaly, PulseError> {
        self.store
            .anomaly(id)
            .await?
            .ok_or_else(|| PulseError::not_found("anomaly", id))
    }

    /// (is a recent regression, recurrence count inside the detection
    /// window) for a metric. Regression means an anomaly on the exact
    /// metric name was resolved within the last seven days.
    async fn recurrence(
        &self,
        metric: &str,
        timestamp: i64,
        config: &DetectionConfig,
    ) -> Result<(bool, u32), PulseError> {
        let window_ms = config.detection_window_days as i64 * DAY_MS;
        let since = timestamp - window_ms.max(REGRESSION_LOOKBACK_MS);
        let rows = self.store.anomalies_since(since).await?;

        let frequency = rows
            .iter()
            .filter(|a| a.metric_name == metric && a.detected_at >= timestamp - window_ms)
            .count() as u32;
        let regression = rows.iter().any(|a| {
            a.metric_name == metric
                && a.status == AnomalyStatus::Resolved
                && a.detected_at >= timestamp - REGRESSION_LOOKBACK_MS
        });
        Ok((regression, frequency))
    }

    /// How long the metric has had an unresolved anomaly: the age of
    /// its oldest active record, zero when the slate is clean.
    async fn condition_age(&self, metric: &str, timestamp: i64) -> Result<u64, PulseError> {
        let active = self.store.active_anomalies(Some(metric)).await?;
        let age = active
            .last() // newest-first ordering: last is oldest
            .map(|a| (timestamp - a.detected_at).max(0) as u64)
            .unwrap_or(0);
        Ok(age)
    }
}

/// The flagged verdict with the largest absolute deviation. Earlier
/// ensemble members win ties, which keeps the precedence order stable.
fn pick_primary(verdicts: &[Verdict]) -> Option<&Verdict> {
    verdicts
        .iter()
        .filter(|v| v.flagged)
        .reduce(|best, v| {
            if v.deviation.abs() > best.deviation.abs() {
                v
            } else {
                best
            }
        })
}

/// Classify what kind of misbehavior a deviation on this metric is,
/// from the metric's name and the deviation's direction.
fn classify(metric: &str, deviation: f64) -> AnomalyType {
    let name = metric.to_lowercase();
    let positive = deviation >= 0.0;
    if name.contains("duration") || name.contains("time") {
        if positive {
            AnomalyType::DurationSpike
        } else {
            AnomalyType::PerformanceDegradation
        }
    } else if name.contains("failure") || name.contains("error") {
        AnomalyType::FailureSpike
    } else if name.contains("success") || name.contains("pass") {
        if positive {
            AnomalyType::TrendChange
        } else {
            AnomalyType::SuccessRateDrop
        }
    } else if name.contains("memory") || name.contains("cpu") || name.contains("resource") {
        AnomalyType::ResourceAnomaly
    } else if positive {
        AnomalyType::TrendChange
    } else {
        AnomalyType::PerformanceDegradation
    }
}

fn roll_up<'a>(anomalies: impl Iterator<Item = &'a Anomaly>) -> SuiteStatus {
    let mut status = SuiteStatus::Normal;
    for anomaly in anomalies {
        if anomaly.severity.is_urgent() {
            return SuiteStatus::Critical;
        }
        status = SuiteStatus::Warning;
    }
    status
}

/// Summary statistics over the history, standing in for a missing
/// stored baseline.
fn synthesize_baseline(history: &[f64], timestamp: i64) -> crate::models::Baseline {
    crate::models::Baseline {
        mean: stats::mean(history),
        std_dev: stats::std_dev(history),
        min: history.iter().copied().fold(f64::INFINITY, f64::min),
        max: history.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        sample_count: history.len(),
        period: "ad_hoc".to_string(),
        last_updated: timestamp,
        percentiles: Some(crate::models::Percentiles {
            p5: stats::percentile(history, 5.0),
            p25: stats::percentile(history, 25.0),
            p50: stats::percentile(history, 50.0),
            p75: stats::percentile(history, 75.0),
            p95: stats::percentile(history, 95.0),
        }),
    }
}
