//! End-to-end tests for the detection pipeline: history in, baseline
//! fit, ensemble detection, severity, alert suppression.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use pulse_lib::alert::{AlertDecision, Clock, ManualClock, Suppression};
use pulse_lib::detector::SignalSource;
use pulse_lib::error::StoreError;
use pulse_lib::models::{
    Anomaly, AnomalyAlert, Baseline, CaseHistory, CaseRun, DataPoint, HealthScore, MetricSample,
    SuiteStatus,
};
use pulse_lib::seasonality::SeasonalProfile;
use pulse_lib::store::{MemoryStore, MetricStore};
use pulse_lib::{AlertConfig, MetricPipeline, PipelineConfig, PulseError};

fn harness(config: PipelineConfig) -> (Arc<ManualClock>, Arc<MemoryStore>, MetricPipeline) {
    let clock = Arc::new(ManualClock::new(10_000_000));
    let store = Arc::new(MemoryStore::new());
    let pipeline = MetricPipeline::builder(store.clone())
        .config(config)
        .clock(clock.clone() as Arc<dyn Clock>)
        .build()
        .expect("default config is valid");
    (clock, store, pipeline)
}

fn steady_points(n: usize, center: f64, spread: f64) -> Vec<DataPoint> {
    (0..n)
        .map(|i| DataPoint::new(i as i64 * 60_000, center + (i % 5) as f64 * spread))
        .collect()
}

#[tokio::test]
async fn spike_flows_from_history_to_notification() -> anyhow::Result<()> {
    let (_clock, store, pipeline) = harness(PipelineConfig::default());

    let points = steady_points(60, 120.0, 1.0);
    let baseline = pipeline.rebuild_baseline("avg_duration_ms", &points).await?;
    assert!(baseline.sample_count > 0);
    assert!(baseline.std_dev >= 0.0);

    let outcome = pipeline.ingest("avg_duration_ms", 400.0, 61 * 60_000).await?;
    assert!(outcome.detection.is_anomaly);
    let anomaly = outcome.detection.anomaly.clone().unwrap();
    assert_eq!(anomaly.metric_name, "avg_duration_ms");
    assert!(anomaly.deviation > 0.0);

    let AlertDecision::Sent(alert) = outcome.decision.unwrap() else {
        panic!("expected a notification");
    };
    assert_eq!(alert.anomaly_id, anomaly.id);
    assert!(alert.title.contains("avg_duration_ms"));

    // Both records reached the store.
    assert!(store.anomaly(&anomaly.id).await?.is_some());
    assert!(store.alert(&alert.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn quiet_metric_never_alerts() {
    let (_clock, store, pipeline) = harness(PipelineConfig::default());
    let points = steady_points(60, 0.95, 0.002);
    pipeline.rebuild_baseline("pass_rate", &points).await.unwrap();

    for i in 0..10 {
        let outcome = pipeline
            .ingest("pass_rate", 0.95 + (i % 3) as f64 * 0.002, (61 + i) * 60_000)
            .await
            .unwrap();
        assert!(!outcome.detection.is_anomaly);
    }
    assert!(store.alerts(true).await.unwrap().is_empty());
    assert!(store.active_anomalies(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_burst_is_suppressed_then_converges() {
    let config = PipelineConfig {
        alerts: AlertConfig {
            deduplication_window_ms: 1_000,
            convergence_window_ms: 60_000,
            max_alerts_per_window: 2,
            cooldown_period_ms: 300_000,
            ..AlertConfig::default()
        },
        ..PipelineConfig::default()
    };
    let (clock, _store, pipeline) = harness(config);
    let points = steady_points(60, 5.0, 0.1);
    pipeline
        .rebuild_baseline("failure_count", &points)
        .await
        .unwrap();

    let mut decisions = Vec::new();
    for i in 0..4 {
        let outcome = pipeline
            .ingest("failure_count", 80.0, (61 + i) * 60_000)
            .await
            .unwrap();
        decisions.push(outcome.decision.unwrap());
        clock.advance(2_000); // clear each dedup window
    }

    assert!(decisions[0].is_sent());
    assert!(decisions[1].is_sent());
    assert_eq!(decisions[2], AlertDecision::Suppressed(Suppression::Converged));
    assert_eq!(decisions[3], AlertDecision::Suppressed(Suppression::InCooldown));
}

#[tokio::test]
async fn seasonal_metric_tolerates_its_peak_hours() -> anyhow::Result<()> {
    use chrono::TimeZone;

    let config = PipelineConfig {
        baseline: pulse_lib::BaselineConfig {
            seasonal: true,
            ..pulse_lib::BaselineConfig::default()
        },
        ..PipelineConfig::default()
    };
    let (_clock, store, pipeline) = harness(config);

    // Three weeks of hourly duration data: busy daytime, quiet nights,
    // plus jitter so the deseasonalized series keeps some spread.
    let start = chrono::Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .unwrap()
        .timestamp_millis();
    let hour = 3_600_000i64;
    let points: Vec<DataPoint> = (0..21 * 24)
        .map(|i| {
            let h = i % 24;
            let base = if (9..17).contains(&h) { 200.0 } else { 100.0 };
            DataPoint::new(start + i as i64 * hour, base + (i % 7) as f64)
        })
        .collect();
    for p in &points {
        store.record_point("build_time_ms", *p).await?;
    }
    pipeline.rebuild_baseline("build_time_ms", &points).await?;
    assert!(store.profile("build_time_ms").await?.is_some());

    // A daytime reading at the seasonal peak is normal once adjusted.
    let noon = start + 21 * 24 * hour + 12 * hour;
    let at_peak = pipeline.ingest("build_time_ms", 200.0, noon).await?;
    assert!(!at_peak.detection.is_anomaly);

    // The same magnitude at 3am is way off the deseasonalized baseline.
    let night = start + 21 * 24 * hour + 3 * hour;
    let off_cycle = pipeline.ingest("build_time_ms", 400.0, night).await?;
    assert!(off_cycle.detection.is_anomaly);
    Ok(())
}

#[tokio::test]
async fn health_score_thresholds_match_the_contract() {
    let (clock, _store, pipeline) = harness(PipelineConfig::default());

    assert!(pipeline.record_health_score(85.0).await.unwrap().is_none());
    clock.advance(1_000);

    // A two-point dip is noise.
    assert!(pipeline.record_health_score(83.0).await.unwrap().is_none());
    clock.advance(1_000);

    // A 23-point collapse from the (now lower) reference is critical.
    let alert = pipeline.record_health_score(60.0).await.unwrap().unwrap();
    assert_eq!(alert.level, pulse_lib::AlertLevel::Critical);
}

#[tokio::test]
async fn flaky_case_and_streak_case_are_both_caught() {
    let (_clock, _store, pipeline) = harness(PipelineConfig::default());
    let flapping: Vec<CaseRun> = (0..12)
        .map(|i| CaseRun {
            passed: i % 2 == 0,
            timestamp: i as i64 * 1_000,
        })
        .collect();
    let streaking: Vec<CaseRun> = (0..12)
        .map(|i| CaseRun {
            passed: i < 8,
            timestamp: i as i64 * 1_000,
        })
        .collect();

    let scan = pipeline
        .scan_cases(&[
            CaseHistory {
                case_id: "ui_settings".to_string(),
                runs: flapping,
            },
            CaseHistory {
                case_id: "api_login".to_string(),
                runs: streaking,
            },
        ])
        .await
        .unwrap();

    assert_eq!(scan.anomalies.len(), 2);
    assert_ne!(scan.status, SuiteStatus::Normal);
    let types: Vec<_> = scan.anomalies.iter().map(|a| a.anomaly_type).collect();
    assert!(types.contains(&pulse_lib::AnomalyType::FlakyPattern));
    assert!(types.contains(&pulse_lib::AnomalyType::FailureSpike));
}

#[tokio::test]
async fn suite_observation_reports_insufficient_data_per_metric() {
    let (_clock, _store, pipeline) = harness(PipelineConfig::default());
    let report = pipeline
        .observe_suite(&[MetricSample {
            metric: "never_seen".to_string(),
            value: 42.0,
            timestamp: 1_000,
        }])
        .await
        .unwrap();
    assert_eq!(report.status, SuiteStatus::Normal);
    assert_eq!(
        report.outcomes[0].detection.signal,
        SignalSource::InsufficientData
    );
}

#[tokio::test]
async fn empty_history_cannot_build_a_baseline() {
    let (_clock, _store, pipeline) = harness(PipelineConfig::default());
    let err = pipeline.rebuild_baseline("anything", &[]).await;
    assert!(matches!(err, Err(PulseError::EmptyBaselineInput(_))));
}

#[tokio::test]
async fn alert_acknowledgement_survives_the_round_trip() -> anyhow::Result<()> {
    let (clock, store, pipeline) = harness(PipelineConfig::default());
    let points = steady_points(60, 5.0, 0.1);
    pipeline.rebuild_baseline("error_count", &points).await?;
    let outcome = pipeline.ingest("error_count", 90.0, 61 * 60_000).await?;
    let AlertDecision::Sent(alert) = outcome.decision.unwrap() else {
        panic!("expected a notification");
    };

    clock.advance(1_000);
    let acked = pipeline.alerts().acknowledge(&alert.id).await?;
    assert!(acked.acknowledged);
    let at = acked.acknowledged_at.unwrap();

    clock.advance(1_000);
    let again = pipeline.alerts().acknowledge(&alert.id).await?;
    assert_eq!(again.acknowledged_at, Some(at));

    let stored = store.alert(&alert.id).await?.unwrap();
    assert!(stored.acknowledged);
    Ok(())
}

/// Store wrapper that fails baseline reads and anomaly writes on
/// demand, for exercising error propagation.
struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn outage(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("backend offline".to_string()))
    }
}

#[async_trait]
impl MetricStore for FlakyStore {
    async fn record_point(&self, metric: &str, point: DataPoint) -> Result<(), StoreError> {
        self.inner.record_point(metric, point).await
    }

    async fn history(&self, metric: &str, since_ms: i64) -> Result<Vec<DataPoint>, StoreError> {
        self.inner.history(metric, since_ms).await
    }

    async fn save_baseline(&self, metric: &str, baseline: Baseline) -> Result<(), StoreError> {
        self.inner.save_baseline(metric, baseline).await
    }

    async fn baseline(&self, metric: &str) -> Result<Option<Baseline>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            self.outage()?;
        }
        self.inner.baseline(metric).await
    }

    async fn save_profile(&self, metric: &str, profile: SeasonalProfile) -> Result<(), StoreError> {
        self.inner.save_profile(metric, profile).await
    }

    async fn clear_profile(&self, metric: &str) -> Result<(), StoreError> {
        self.inner.clear_profile(metric).await
    }

    async fn profile(&self, metric: &str) -> Result<Option<SeasonalProfile>, StoreError> {
        self.inner.profile(metric).await
    }

    async fn save_anomaly(&self, anomaly: Anomaly) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.outage()?;
        }
        self.inner.save_anomaly(anomaly).await
    }

    async fn anomaly(&self, id: &str) -> Result<Option<Anomaly>, StoreError> {
        self.inner.anomaly(id).await
    }

    async fn active_anomalies(&self, metric: Option<&str>) -> Result<Vec<Anomaly>, StoreError> {
        self.inner.active_anomalies(metric).await
    }

    async fn anomalies_since(&self, since_ms: i64) -> Result<Vec<Anomaly>, StoreError> {
        self.inner.anomalies_since(since_ms).await
    }

    async fn save_alert(&self, alert: AnomalyAlert) -> Result<(), StoreError> {
        self.inner.save_alert(alert).await
    }

    async fn alert(&self, id: &str) -> Result<Option<AnomalyAlert>, StoreError> {
        self.inner.alert(id).await
    }

    async fn alerts(&self, include_acknowledged: bool) -> Result<Vec<AnomalyAlert>, StoreError> {
        self.inner.alerts(include_acknowledged).await
    }

    async fn update_alert(&self, alert: AnomalyAlert) -> Result<(), StoreError> {
        self.inner.update_alert(alert).await
    }

    async fn prune_alerts(&self, cutoff_ms: i64) -> Result<usize, StoreError> {
        self.inner.prune_alerts(cutoff_ms).await
    }

    async fn save_health(&self, score: HealthScore) -> Result<(), StoreError> {
        self.inner.save_health(score).await
    }

    async fn latest_health(&self) -> Result<Option<HealthScore>, StoreError> {
        self.inner.latest_health().await
    }
}

#[tokio::test]
async fn store_outage_aborts_detection_instead_of_reporting_healthy() {
    let store = Arc::new(FlakyStore::new());
    let pipeline = MetricPipeline::builder(store.clone()).build().unwrap();

    let points = steady_points(60, 5.0, 0.1);
    pipeline
        .rebuild_baseline("failure_count", &points)
        .await
        .unwrap();

    // Baseline read failure: the detect call errors, it does not
    // fabricate a quiet verdict.
    store.fail_reads.store(true, Ordering::SeqCst);
    let read_err = pipeline.ingest("failure_count", 90.0, 61 * 60_000).await;
    assert!(matches!(read_err, Err(PulseError::Store(_))));
    store.fail_reads.store(false, Ordering::SeqCst);

    // Anomaly write failure likewise aborts.
    store.fail_writes.store(true, Ordering::SeqCst);
    let write_err = pipeline.ingest("failure_count", 90.0, 62 * 60_000).await;
    assert!(matches!(write_err, Err(PulseError::Store(_))));
    store.fail_writes.store(false, Ordering::SeqCst);

    // With the store back, the same value is detected and alerted.
    let outcome = pipeline.ingest("failure_count", 90.0, 63 * 60_000).await.unwrap();
    assert!(outcome.detection.is_anomaly);
}
