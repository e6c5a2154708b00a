//! Pipeline facade
//!
//! Wires preprocessing, baselines, detection, scoring and alerting into
//! one explicitly constructed object. There are no module-level
//! singletons: whoever builds the pipeline owns it and passes it on.

use std::sync::Arc;

use crate::alert::{AlertDecision, AlertTrigger, Clock};
use crate::baseline::BaselineBuilder;
use crate::config::PipelineConfig;
use crate::detector::{AnomalyDetector, BatchOutcome, CaseScan, DetectionResult};
use crate::error::PulseError;
use crate::models::{
    AnomalyAlert, Baseline, CaseHistory, DataPoint, MetricSample, SuiteStatus,
};
use crate::observability::StructuredLogger;
use crate::severity::SeverityEvaluator;
use crate::store::MetricStore;

/// What happened to one ingested value: the detection verdict, and the
/// alert decision when the verdict was an anomaly.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub detection: DetectionResult,
    pub decision: Option<AlertDecision>,
}

/// Batch observation: per-metric outcomes plus the suite roll-up.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteReport {
    pub status: SuiteStatus,
    pub outcomes: Vec<PipelineOutcome>,
}

/// Step-by-step construction for [`MetricPipeline`].
pub struct PipelineBuilder {
    store: Arc<dyn MetricStore>,
    config: PipelineConfig,
    clock: Option<Arc<dyn Clock>>,
    logger: Option<StructuredLogger>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject a clock for the alert state machine; tests crank it by
    /// hand instead of sleeping.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<MetricPipeline, PulseError> {
        self.config.validate()?;
        let logger = self.logger.unwrap_or_else(|| StructuredLogger::new("pulse"));

        let baseline_builder = BaselineBuilder::new(self.config.baseline.clone())
            .with_seasonality(self.config.seasonality);
        let evaluator = SeverityEvaluator::new(self.config.severity_weights);
        let detector =
            AnomalyDetector::new(self.store.clone(), evaluator).with_logger(logger.clone());
        let mut trigger = AlertTrigger::new(self.config.alerts.clone(), self.store.clone())
            .with_logger(logger);
        if let Some(clock) = self.clock {
            trigger = trigger.with_clock(clock);
        }

        Ok(MetricPipeline {
            store: self.store,
            config: self.config,
            baseline_builder,
            detector,
            trigger,
        })
    }
}

/// The full detection pipeline for one deployment.
///
/// Alert suppression state lives inside the embedded trigger and is
/// process-local; run exactly one pipeline per store.
pub struct MetricPipeline {
    store: Arc<dyn MetricStore>,
    config: PipelineConfig,
    baseline_builder: BaselineBuilder,
    detector: AnomalyDetector,
    trigger: AlertTrigger,
}

impl MetricPipeline {
    pub fn builder(store: Arc<dyn MetricStore>) -> PipelineBuilder {
        PipelineBuilder {
            store,
            config: PipelineConfig::default(),
            clock: None,
            logger: None,
        }
    }

    /// Record one sample, judge it, and push any anomaly through the
    /// alert trigger. Store failures abort with the error.
    pub async fn ingest(
        &self,
        metric: &str,
        value: f64,
        timestamp: i64,
    ) -> Result<PipelineOutcome, PulseError> {
        self.store
            .record_point(metric, DataPoint::new(timestamp, value))
            .await?;
        let detection = self
            .detector
            .detect(metric, value, timestamp, &self.config.detection, None)
            .await?;
        let decision = match &detection.anomaly {
            Some(anomaly) => Some(self.trigger.process_anomaly(anomaly).await?),
            None => None,
        };
        Ok(PipelineOutcome {
            detection,
            decision,
        })
    }

    /// Refit and persist the baseline (and seasonal profile) for a
    /// metric from explicit history.
    pub async fn rebuild_baseline(
        &self,
        metric: &str,
        points: &[DataPoint],
    ) -> Result<Baseline, PulseError> {
        self.baseline_builder
            .build_and_store(metric, points, self.store.as_ref())
            .await
    }

    /// Refit the baseline from the history the store already holds for
    /// the metric, over the configured detection window.
    pub async fn rebuild_baseline_from_store(&self, metric: &str) -> Result<Baseline, PulseError> {
        let window_ms = self.config.detection.detection_window_days as i64 * 24 * 60 * 60 * 1000;
        let since = chrono::Utc::now().timestamp_millis() - window_ms;
        let points = self.store.history(metric, since).await?;
        self.rebuild_baseline(metric, &points).await
    }

    /// Batch detection over a suite observation, alerting per anomaly.
    pub async fn observe_suite(
        &self,
        samples: &[MetricSample],
    ) -> Result<SuiteReport, PulseError> {
        let BatchOutcome { status, results } = self
            .detector
            .detect_batch(samples, &self.config.detection)
            .await?;
        let mut outcomes = Vec::with_capacity(results.len());
        for detection in results {
            let decision = match &detection.anomaly {
                Some(anomaly) => Some(self.trigger.process_anomaly(anomaly).await?),
                None => None,
            };
            outcomes.push(PipelineOutcome {
                detection,
                decision,
            });
        }
        Ok(SuiteReport { status, outcomes })
    }

    /// Pattern scan over per-case run histories, alerting per anomaly.
    pub async fn scan_cases(&self, cases: &[CaseHistory]) -> Result<CaseScan, PulseError> {
        let scan = self
            .detector
            .detect_for_cases(cases, &self.config.detection)
            .await?;
        for anomaly in &scan.anomalies {
            self.trigger.process_anomaly(anomaly).await?;
        }
        Ok(scan)
    }

    /// Feed a suite health score through the alert trigger's health
    /// path.
    pub async fn record_health_score(
        &self,
        score: f64,
    ) -> Result<Option<AnomalyAlert>, PulseError> {
        self.trigger.record_health_score(score).await
    }

    /// Anomaly lifecycle and enrichment operations.
    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Alert acknowledgement, cleanup and config hot-reload.
    pub fn alerts(&self) -> &AlertTrigger {
        &self.trigger
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{ManualClock, Suppression};
    use crate::detector::SignalSource;
    use crate::store::MemoryStore;

    fn harness() -> (Arc<ManualClock>, Arc<MemoryStore>, MetricPipeline) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(MemoryStore::new());
        let pipeline = MetricPipeline::builder(store.clone())
            .clock(clock.clone() as Arc<dyn Clock>)
            .build()
            .unwrap();
        (clock, store, pipeline)
    }

    #[tokio::test]
    async fn invalid_config_fails_the_build() {
        let store = Arc::new(MemoryStore::new());
        let mut config = PipelineConfig::default();
        config.detection.min_data_points = 0;
        assert!(MetricPipeline::builder(store)
            .config(config)
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn ingest_records_detects_and_alerts() {
        let (_clock, store, pipeline) = harness();

        // Build up a quiet history, then rebuild the baseline from it.
        let points: Vec<DataPoint> = (0..40)
            .map(|i| DataPoint::new(i * 60_000, 2.0 + (i % 3) as f64 * 0.1))
            .collect();
        pipeline
            .rebuild_baseline("failure_count", &points)
            .await
            .unwrap();

        // Quiet value: recorded, no anomaly, no decision.
        let quiet = pipeline.ingest("failure_count", 2.1, 41 * 60_000).await.unwrap();
        assert!(!quiet.detection.is_anomaly);
        assert!(quiet.decision.is_none());
        assert_eq!(store.history("failure_count", 0).await.unwrap().len(), 1);

        // Spike: anomaly persisted and alert sent.
        let spike = pipeline.ingest("failure_count", 50.0, 42 * 60_000).await.unwrap();
        assert!(spike.detection.is_anomaly);
        let decision = spike.decision.unwrap();
        assert!(decision.is_sent());
        assert_eq!(store.alerts(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeat_spikes_dedup_downstream() {
        let (_clock, store, pipeline) = harness();
        let points: Vec<DataPoint> = (0..40)
            .map(|i| DataPoint::new(i * 60_000, 2.0 + (i % 3) as f64 * 0.1))
            .collect();
        pipeline
            .rebuild_baseline("failure_count", &points)
            .await
            .unwrap();

        let first = pipeline.ingest("failure_count", 50.0, 41 * 60_000).await.unwrap();
        let second = pipeline.ingest("failure_count", 51.0, 42 * 60_000).await.unwrap();

        // Both detections produced anomaly rows; only one alert went out.
        assert!(first.detection.is_anomaly && second.detection.is_anomaly);
        assert_eq!(
            second.decision.unwrap(),
            AlertDecision::Suppressed(Suppression::Duplicate)
        );
        assert_eq!(store.alerts(true).await.unwrap().len(), 1);
        assert_eq!(store.active_anomalies(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fresh_metric_reports_insufficient_data() {
        let (_clock, _store, pipeline) = harness();
        let outcome = pipeline.ingest("brand_new", 1.0, 1_000).await.unwrap();
        assert_eq!(outcome.detection.signal, SignalSource::InsufficientData);
        assert!(outcome.decision.is_none());
    }

    #[tokio::test]
    async fn suite_observation_aggregates_and_alerts() {
        let (_clock, store, pipeline) = harness();
        let points: Vec<DataPoint> = (0..40)
            .map(|i| DataPoint::new(i * 60_000, 0.9 + (i % 5) as f64 * 0.02))
            .collect();
        pipeline.rebuild_baseline("pass_rate", &points).await.unwrap();
        // A prior resolved anomaly turns the drop into a regression.
        let seeded = pipeline
            .ingest("pass_rate", 0.4, 41 * 60_000)
            .await
            .unwrap();
        let id = seeded.detection.anomaly.unwrap().id;
        pipeline.detector().resolve_anomaly(&id).await.unwrap();

        let report = pipeline
            .observe_suite(&[
                MetricSample {
                    metric: "pass_rate".to_string(),
                    value: 0.4,
                    timestamp: 42 * 60_000,
                },
                MetricSample {
                    metric: "unknown_metric".to_string(),
                    value: 1.0,
                    timestamp: 42 * 60_000,
                },
            ])
            .await
            .unwrap();

        assert_eq!(report.status, SuiteStatus::Critical);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(
            report.outcomes[1].detection.signal,
            SignalSource::InsufficientData
        );
        assert!(store.alerts(true).await.unwrap().len() >= 1);
    }

    #[tokio::test]
    async fn case_scan_alerts_on_streaks() {
        let (_clock, store, pipeline) = harness();
        let runs: Vec<crate::models::CaseRun> = (0..8)
            .map(|i| crate::models::CaseRun {
                passed: i < 3,
                timestamp: i as i64 * 1_000,
            })
            .collect();
        let scan = pipeline
            .scan_cases(&[CaseHistory {
                case_id: "checkout".to_string(),
                runs,
            }])
            .await
            .unwrap();
        assert_eq!(scan.anomalies.len(), 1);
        assert_eq!(store.alerts(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health_path_flows_through_the_facade() {
        let (clock, _store, pipeline) = harness();
        assert!(pipeline.record_health_score(90.0).await.unwrap().is_none());
        clock.advance(1_000);
        let alert = pipeline.record_health_score(65.0).await.unwrap().unwrap();
        assert_eq!(alert.title, "Health score drop");
    }
}
