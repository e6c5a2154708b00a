//! Observability infrastructure for the detection pipeline
//!
//! Provides:
//! - Prometheus metrics (detection latency, anomaly/alert counters, cooldown gauge)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_gauge, register_int_gauge_vec, Histogram, IntGauge,
    IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{AlertLevel, AnomalyType, SeverityLevel};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct PipelineMetricsInner {
    detection_latency_seconds: Histogram,
    detections: IntGauge,
    anomalies_detected: IntGauge,
    alerts_notified: IntGauge,
    alerts_suppressed: IntGaugeVec,
    baselines_built: IntGauge,
    persistence_errors: IntGauge,
    active_cooldowns: IntGauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            detection_latency_seconds: register_histogram!(
                "pulse_detection_latency_seconds",
                "Time spent running the detection ensemble for one value",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register detection_latency_seconds"),

            detections: register_int_gauge!(
                "pulse_detections_total",
                "Total number of detection passes executed"
            )
            .expect("Failed to register detections_total"),

            anomalies_detected: register_int_gauge!(
                "pulse_anomalies_detected_total",
                "Total number of anomalies detected"
            )
            .expect("Failed to register anomalies_detected_total"),

            alerts_notified: register_int_gauge!(
                "pulse_alerts_notified_total",
                "Total number of alerts that passed suppression and were recorded"
            )
            .expect("Failed to register alerts_notified_total"),

            alerts_suppressed: register_int_gauge_vec!(
                "pulse_alerts_suppressed_total",
                "Total number of alerts suppressed, by reason",
                &["reason"]
            )
            .expect("Failed to register alerts_suppressed_total"),

            baselines_built: register_int_gauge!(
                "pulse_baselines_built_total",
                "Total number of baseline rebuilds"
            )
            .expect("Failed to register baselines_built_total"),

            persistence_errors: register_int_gauge!(
                "pulse_persistence_errors_total",
                "Total number of store persistence failures"
            )
            .expect("Failed to register persistence_errors_total"),

            active_cooldowns: register_int_gauge!(
                "pulse_active_cooldowns",
                "Number of alert groups currently in cooldown"
            )
            .expect("Failed to register active_cooldowns"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record how long one detection pass took
    pub fn observe_detection_latency(&self, duration_secs: f64) {
        self.inner().detection_latency_seconds.observe(duration_secs);
    }

    /// Increment the detection pass counter
    pub fn inc_detections(&self) {
        self.inner().detections.inc();
    }

    /// Increment the detected anomaly counter
    pub fn inc_anomalies_detected(&self) {
        self.inner().anomalies_detected.inc();
    }

    /// Increment the notified alert counter
    pub fn inc_alerts_notified(&self) {
        self.inner().alerts_notified.inc();
    }

    /// Increment the suppressed alert counter for a reason
    pub fn inc_alerts_suppressed(&self, reason: &str) {
        self.inner()
            .alerts_suppressed
            .with_label_values(&[reason])
            .inc();
    }

    /// Increment the baseline rebuild counter
    pub fn inc_baselines_built(&self) {
        self.inner().baselines_built.inc();
    }

    /// Increment the persistence failure counter
    pub fn inc_persistence_errors(&self) {
        self.inner().persistence_errors.inc();
    }

    /// Update the active cooldown gauge
    pub fn set_active_cooldowns(&self, count: i64) {
        self.inner().active_cooldowns.set(count);
    }
}

/// Structured logger for pipeline events
///
/// Provides consistent JSON-formatted logging for detections, alerts
/// and health changes, tagged with the suite they belong to.
#[derive(Clone)]
pub struct StructuredLogger {
    suite: String,
}

impl StructuredLogger {
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
        }
    }

    /// Log a detected anomaly
    pub fn log_anomaly(
        &self,
        metric: &str,
        anomaly_type: AnomalyType,
        severity: SeverityLevel,
        score: f64,
        deviation: f64,
        detail: &str,
    ) {
        if severity.is_urgent() {
            warn!(
                event = "anomaly_detected",
                suite = %self.suite,
                metric = %metric,
                anomaly_type = %anomaly_type,
                severity = %severity,
                score = score,
                deviation = deviation,
                detail = %detail,
                "Anomaly detected"
            );
        } else {
            info!(
                event = "anomaly_detected",
                suite = %self.suite,
                metric = %metric,
                anomaly_type = %anomaly_type,
                severity = %severity,
                score = score,
                deviation = deviation,
                detail = %detail,
                "Anomaly detected"
            );
        }
    }

    /// Log an alert that passed suppression
    pub fn log_alert_sent(&self, alert_id: &str, anomaly_id: &str, level: AlertLevel, title: &str) {
        info!(
            event = "alert_sent",
            suite = %self.suite,
            alert_id = %alert_id,
            anomaly_id = %anomaly_id,
            level = %level,
            title = %title,
            "Alert recorded"
        );
    }

    /// Log a suppressed alert with its reason
    pub fn log_alert_suppressed(&self, anomaly_id: &str, title: &str, reason: &str) {
        info!(
            event = "alert_suppressed",
            suite = %self.suite,
            anomaly_id = %anomaly_id,
            title = %title,
            reason = %reason,
            "Alert suppressed"
        );
    }

    /// Log a suite health score change
    pub fn log_health_change(&self, previous: Option<f64>, current: f64, drop: f64) {
        if drop > 0.0 {
            warn!(
                event = "health_changed",
                suite = %self.suite,
                previous = ?previous,
                current = current,
                drop = drop,
                "Suite health dropped"
            );
        } else {
            info!(
                event = "health_changed",
                suite = %self.suite,
                previous = ?previous,
                current = current,
                "Suite health updated"
            );
        }
    }

    /// Log pipeline startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "pipeline_started",
            suite = %self.suite,
            version = %version,
            "Detection pipeline started"
        );
    }
}
