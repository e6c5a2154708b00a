//! Alert orchestration
//!
//! Handles:
//! - Rendering anomalies into human-readable alerts
//! - Suppression: minimum severity, cooldown, deduplication, convergence
//! - The suite health score side channel
//!
//! Suppression state is process-local. Running several triggers against
//! one store multiplies alerts; deploy one trigger per store.

pub mod cache;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

pub use cache::{Clock, ManualClock, SystemClock};

use crate::alert::cache::TtlCache;
use crate::config::AlertConfig;
use crate::error::PulseError;
use crate::models::{
    unique_suffix, AlertLevel, Anomaly, AnomalyAlert, HealthScore, SeverityLevel,
};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::store::MetricStore;

/// Health drop that warrants a warning alert.
const HEALTH_WARN_DROP: f64 = 10.0;
/// Health drop that escalates to a critical alert.
const HEALTH_CRITICAL_DROP: f64 = 20.0;

/// Why an alert was withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    Disabled,
    BelowMinSeverity,
    InCooldown,
    Duplicate,
    Converged,
}

impl Suppression {
    /// Label used on the suppression metric and in logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Suppression::Disabled => "disabled",
            Suppression::BelowMinSeverity => "below_min_severity",
            Suppression::InCooldown => "cooldown",
            Suppression::Duplicate => "dedup",
            Suppression::Converged => "converged",
        }
    }
}

/// Outcome of pushing one anomaly through the trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    Sent(AnomalyAlert),
    Suppressed(Suppression),
}

impl AlertDecision {
    pub fn is_sent(&self) -> bool {
        matches!(self, AlertDecision::Sent(_))
    }
}

/// Key for deduplication: alerts for the same condition on the same
/// subject collapse within the dedup window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    title: String,
    scope: String,
}

/// The first two `-`-separated segments of a record id, e.g.
/// `anomaly-pass_rate` out of `anomaly-pass_rate-18c9a2f4b30`.
fn dedup_scope(anomaly_id: &str) -> String {
    anomaly_id.splitn(3, '-').take(2).collect::<Vec<_>>().join("-")
}

/// Rolling per-title window counting alerts toward the convergence cap.
#[derive(Debug, Clone)]
struct ConvergenceGroup {
    window_start: i64,
    alerts_in_window: usize,
    last_seen: i64,
}

impl ConvergenceGroup {
    fn new(now: i64) -> Self {
        Self {
            window_start: now,
            alerts_in_window: 0,
            last_seen: now,
        }
    }
}

struct TriggerState {
    config: AlertConfig,
    dedup: TtlCache<DedupKey>,
    groups: HashMap<String, ConvergenceGroup>,
    cooldowns: TtlCache<String>,
}

impl TriggerState {
    fn new(config: AlertConfig) -> Self {
        let dedup = TtlCache::new(config.deduplication_window_ms);
        let cooldowns = TtlCache::new(config.cooldown_period_ms);
        Self {
            config,
            dedup,
            groups: HashMap::new(),
            cooldowns,
        }
    }

    /// The suppression gates, applied in order: enabled, minimum
    /// severity, cooldown, dedup, convergence. `Ok` means the alert
    /// goes out and has been recorded against dedup and its group.
    fn decide(
        &mut self,
        now: i64,
        title: &str,
        anomaly_id: &str,
        severity: SeverityLevel,
    ) -> Result<(), Suppression> {
        if !self.config.enabled {
            return Err(Suppression::Disabled);
        }
        if severity < self.config.min_severity {
            return Err(Suppression::BelowMinSeverity);
        }
        if self.cooldowns.contains(&title.to_string(), now) {
            return Err(Suppression::InCooldown);
        }
        let key = DedupKey {
            title: title.to_string(),
            scope: dedup_scope(anomaly_id),
        };
        if self.dedup.contains(&key, now) {
            return Err(Suppression::Duplicate);
        }

        let window = self.config.convergence_window_ms as i64;
        let max = self.config.max_alerts_per_window;
        let converged = {
            let group = self
                .groups
                .entry(title.to_string())
                .or_insert_with(|| ConvergenceGroup::new(now));
            if now - group.window_start > window {
                group.window_start = now;
                group.alerts_in_window = 0;
            }
            group.last_seen = now;
            if group.alerts_in_window >= max {
                true
            } else {
                group.alerts_in_window += 1;
                false
            }
        };
        if converged {
            // The group has said its piece: silence the title entirely
            // and start fresh once the cooldown lapses.
            self.groups.remove(title);
            self.cooldowns.insert(title.to_string(), now);
            return Err(Suppression::Converged);
        }

        self.dedup.insert(key, now);
        Ok(())
    }

    /// Health alerts only pass the enabled and dedup gates; they are
    /// rare enough that convergence and cooldown never apply.
    fn decide_health(&mut self, now: i64, title: &str, scope: &str) -> Result<(), Suppression> {
        if !self.config.enabled {
            return Err(Suppression::Disabled);
        }
        let key = DedupKey {
            title: title.to_string(),
            scope: scope.to_string(),
        };
        if self.dedup.contains(&key, now) {
            return Err(Suppression::Duplicate);
        }
        self.dedup.insert(key, now);
        Ok(())
    }
}

/// Turns anomalies into alerts with noise suppression.
pub struct AlertTrigger {
    store: Arc<dyn MetricStore>,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
    metrics: PipelineMetrics,
    state: Mutex<TriggerState>,
}

impl AlertTrigger {
    pub fn new(config: AlertConfig, store: Arc<dyn MetricStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            logger: StructuredLogger::new("pulse"),
            metrics: PipelineMetrics::new(),
            state: Mutex::new(TriggerState::new(config)),
        }
    }

    /// Replace the wall clock, mainly so tests can crank time by hand.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Run one anomaly through the suppression gates and record the
    /// alert if it survives.
    pub async fn process_anomaly(&self, anomaly: &Anomaly) -> Result<AlertDecision, PulseError> {
        let now = self.clock.now_ms();
        let title = alert_title(anomaly);
        let (decision, cooldown_count) = {
            let mut state = self.state.lock().unwrap();
            let decision = state.decide(now, &title, &anomaly.id, anomaly.severity);
            (decision, state.cooldowns.len())
        };

        match decision {
            Err(suppression) => {
                if suppression == Suppression::Converged {
                    self.metrics.set_active_cooldowns(cooldown_count as i64);
                }
                self.metrics.inc_alerts_suppressed(suppression.reason());
                self.logger
                    .log_alert_suppressed(&anomaly.id, &title, suppression.reason());
                Ok(AlertDecision::Suppressed(suppression))
            }
            Ok(()) => {
                let alert = AnomalyAlert {
                    id: format!("alert-{}", unique_suffix()),
                    anomaly_id: anomaly.id.clone(),
                    level: level_for(anomaly.severity),
                    title: title.clone(),
                    message: render_message(anomaly),
                    created_at: now,
                    acknowledged: false,
                    acknowledged_at: None,
                };
                self.store.save_alert(alert.clone()).await?;
                self.metrics.inc_alerts_notified();
                self.logger
                    .log_alert_sent(&alert.id, &alert.anomaly_id, alert.level, &alert.title);
                Ok(AlertDecision::Sent(alert))
            }
        }
    }

    /// Record a fresh suite health score and alert if it dropped hard
    /// enough since the previous one. The first score ever seen only
    /// establishes the reference.
    pub async fn record_health_score(&self, score: f64) -> Result<Option<AnomalyAlert>, PulseError> {
        let now = self.clock.now_ms();
        let previous = self.store.latest_health().await?;
        self.store
            .save_health(HealthScore {
                score,
                computed_at: now,
            })
            .await?;

        let Some(prev) = previous else {
            self.logger.log_health_change(None, score, 0.0);
            return Ok(None);
        };
        let drop = prev.score - score;
        self.logger
            .log_health_change(Some(prev.score), score, drop.max(0.0));
        if drop < HEALTH_WARN_DROP {
            return Ok(None);
        }

        let title = "Health score drop";
        let decision = {
            let mut state = self.state.lock().unwrap();
            state.decide_health(now, title, "health-score")
        };
        if let Err(suppression) = decision {
            self.metrics.inc_alerts_suppressed(suppression.reason());
            self.logger
                .log_alert_suppressed("health-score", title, suppression.reason());
            return Ok(None);
        }

        let level = if drop >= HEALTH_CRITICAL_DROP {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };
        let alert = AnomalyAlert {
            id: format!("alert-{}", unique_suffix()),
            anomaly_id: format!("health-score-{}", unique_suffix()),
            level,
            title: title.to_string(),
            message: format!(
                "Suite health dropped from {:.1} to {:.1} ({:.1} points).",
                prev.score, score, drop
            ),
            created_at: now,
            acknowledged: false,
            acknowledged_at: None,
        };
        self.store.save_alert(alert.clone()).await?;
        self.metrics.inc_alerts_notified();
        self.logger
            .log_alert_sent(&alert.id, &alert.anomaly_id, alert.level, &alert.title);
        Ok(Some(alert))
    }

    /// Mark one alert acknowledged. Unknown ids are an error;
    /// re-acknowledging is a no-op.
    pub async fn acknowledge(&self, alert_id: &str) -> Result<AnomalyAlert, PulseError> {
        let mut alert = self
            .store
            .alert(alert_id)
            .await?
            .ok_or_else(|| PulseError::not_found("alert", alert_id))?;
        alert.acknowledge(self.clock.now_ms());
        self.store.update_alert(alert.clone()).await?;
        Ok(alert)
    }

    /// Acknowledge every outstanding alert; returns how many changed.
    pub async fn acknowledge_all(&self) -> Result<usize, PulseError> {
        let now = self.clock.now_ms();
        let pending = self.store.alerts(false).await?;
        let count = pending.len();
        for mut alert in pending {
            alert.acknowledge(now);
            self.store.update_alert(alert).await?;
        }
        Ok(count)
    }

    /// Drop expired dedup entries, idle convergence groups and lapsed
    /// cooldowns, and prune stored alerts older than twice the dedup
    /// window. Returns the number of pruned alerts.
    pub async fn cleanup(&self) -> Result<usize, PulseError> {
        let now = self.clock.now_ms();
        let (dedup_purged, groups_dropped, active_cooldowns, dedup_window) = {
            let mut state = self.state.lock().unwrap();
            let dedup_purged = state.dedup.purge_expired(now);
            let idle = state.config.convergence_window_ms as i64;
            let before = state.groups.len();
            state.groups.retain(|_, g| now - g.last_seen <= idle);
            let groups_dropped = before - state.groups.len();
            state.cooldowns.purge_expired(now);
            (
                dedup_purged,
                groups_dropped,
                state.cooldowns.len(),
                state.config.deduplication_window_ms,
            )
        };
        self.metrics.set_active_cooldowns(active_cooldowns as i64);

        let cutoff = now - 2 * dedup_window as i64;
        let pruned = self.store.prune_alerts(cutoff).await?;
        debug!(
            event = "alert_cleanup",
            dedup_purged,
            groups_dropped,
            active_cooldowns,
            pruned_alerts = pruned,
            "alert state cleaned"
        );
        Ok(pruned)
    }

    /// Swap the alert configuration. Windows apply to entries recorded
    /// from now on; existing deadlines run out under their old TTLs.
    pub fn update_config(&self, config: AlertConfig) {
        let mut state = self.state.lock().unwrap();
        state.dedup.set_ttl(config.deduplication_window_ms);
        state.cooldowns.set_ttl(config.cooldown_period_ms);
        state.config = config;
    }
}

fn alert_title(anomaly: &Anomaly) -> String {
    format!("{}: {}", anomaly.anomaly_type.label(), anomaly.metric_name)
}

fn render_message(anomaly: &Anomaly) -> String {
    format!(
        "{} Current value {:.3}, expected {:.3} (severity {}, score {:.0}).",
        anomaly.description,
        anomaly.current_value,
        anomaly.expected_value,
        anomaly.severity,
        anomaly.score
    )
}

fn level_for(severity: SeverityLevel) -> AlertLevel {
    match severity {
        SeverityLevel::Critical | SeverityLevel::High => AlertLevel::Critical,
        SeverityLevel::Medium => AlertLevel::Warning,
        SeverityLevel::Low => AlertLevel::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_anomaly_id, AnomalyStatus, AnomalyType};
    use crate::store::MemoryStore;

    fn test_anomaly(metric: &str, severity: SeverityLevel) -> Anomaly {
        Anomaly {
            id: new_anomaly_id(metric),
            anomaly_type: AnomalyType::FailureSpike,
            severity,
            score: 70.0,
            status: AnomalyStatus::New,
            detected_at: 1_000_000,
            metric_name: metric.to_string(),
            current_value: 12.0,
            expected_value: 2.0,
            deviation: 5.0,
            case_id: None,
            description: "Failure count spiked well above baseline.".to_string(),
            root_causes: Vec::new(),
        }
    }

    fn harness(config: AlertConfig) -> (Arc<ManualClock>, Arc<MemoryStore>, AlertTrigger) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(MemoryStore::new());
        let trigger =
            AlertTrigger::new(config, store.clone()).with_clock(clock.clone() as Arc<dyn Clock>);
        (clock, store, trigger)
    }

    #[tokio::test]
    async fn duplicate_alerts_collapse_within_the_window() {
        let (clock, store, trigger) = harness(AlertConfig::default());
        let anomaly = test_anomaly("pass_rate", SeverityLevel::High);

        let first = trigger.process_anomaly(&anomaly).await.unwrap();
        assert!(first.is_sent());

        // A fresh anomaly for the same condition dedups on title+scope.
        let repeat = test_anomaly("pass_rate", SeverityLevel::High);
        let second = trigger.process_anomaly(&repeat).await.unwrap();
        assert_eq!(second, AlertDecision::Suppressed(Suppression::Duplicate));

        clock.advance(AlertConfig::default().deduplication_window_ms as i64 + 1);
        let third = trigger.process_anomaly(&repeat).await.unwrap();
        assert!(third.is_sent());

        assert_eq!(store.alerts(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn different_metrics_do_not_dedup_each_other() {
        let (_clock, _store, trigger) = harness(AlertConfig::default());
        let a = trigger
            .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::High))
            .await
            .unwrap();
        let b = trigger
            .process_anomaly(&test_anomaly("avg_duration", SeverityLevel::High))
            .await
            .unwrap();
        assert!(a.is_sent());
        assert!(b.is_sent());
    }

    #[tokio::test]
    async fn severity_floor_and_disable_suppress() {
        let mut config = AlertConfig::default();
        config.min_severity = SeverityLevel::High;
        let (_clock, _store, trigger) = harness(config);

        let low = trigger
            .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::Medium))
            .await
            .unwrap();
        assert_eq!(
            low,
            AlertDecision::Suppressed(Suppression::BelowMinSeverity)
        );

        let mut disabled = AlertConfig::default();
        disabled.enabled = false;
        let (_c, _s, off) = harness(disabled);
        let out = off
            .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::Critical))
            .await
            .unwrap();
        assert_eq!(out, AlertDecision::Suppressed(Suppression::Disabled));
    }

    #[tokio::test]
    async fn level_tracks_severity() {
        let (clock, _store, trigger) = harness(AlertConfig::default());
        let send = |sev| test_anomaly("duration_p95", sev);

        let AlertDecision::Sent(critical) = trigger.process_anomaly(&send(SeverityLevel::Critical)).await.unwrap() else {
            panic!("expected sent");
        };
        assert_eq!(critical.level, AlertLevel::Critical);
        assert_eq!(critical.title, "Failure spike: duration_p95");

        clock.advance(400_000);
        let AlertDecision::Sent(warning) = trigger.process_anomaly(&send(SeverityLevel::Medium)).await.unwrap() else {
            panic!("expected sent");
        };
        assert_eq!(warning.level, AlertLevel::Warning);

        clock.advance(400_000);
        let AlertDecision::Sent(info) = trigger.process_anomaly(&send(SeverityLevel::Low)).await.unwrap() else {
            panic!("expected sent");
        };
        assert_eq!(info.level, AlertLevel::Info);
    }

    #[tokio::test]
    async fn convergence_caps_a_noisy_title_then_cools_down() {
        let config = AlertConfig {
            deduplication_window_ms: 1_000,
            convergence_window_ms: 60_000,
            max_alerts_per_window: 5,
            cooldown_period_ms: 120_000,
            ..AlertConfig::default()
        };
        let (clock, _store, trigger) = harness(config);

        // Five alerts pass; each waits out the short dedup window.
        for _ in 0..5 {
            let d = trigger
                .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::High))
                .await
                .unwrap();
            assert!(d.is_sent());
            clock.advance(2_000);
        }

        // The sixth converges the group and arms the cooldown.
        let sixth = trigger
            .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::High))
            .await
            .unwrap();
        assert_eq!(sixth, AlertDecision::Suppressed(Suppression::Converged));

        // The seventh is silenced by the cooldown, not by dedup or the
        // (now cleared) group.
        clock.advance(2_000);
        let seventh = trigger
            .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::High))
            .await
            .unwrap();
        assert_eq!(seventh, AlertDecision::Suppressed(Suppression::InCooldown));

        // Once the cooldown lapses, alerts flow again with a fresh group.
        clock.advance(120_001);
        let after = trigger
            .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::High))
            .await
            .unwrap();
        assert!(after.is_sent());
    }

    #[tokio::test]
    async fn convergence_window_rolls_over() {
        let config = AlertConfig {
            deduplication_window_ms: 1_000,
            convergence_window_ms: 30_000,
            max_alerts_per_window: 5,
            cooldown_period_ms: 120_000,
            ..AlertConfig::default()
        };
        let (clock, _store, trigger) = harness(config);

        for _ in 0..3 {
            assert!(trigger
                .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::High))
                .await
                .unwrap()
                .is_sent());
            clock.advance(2_000);
        }

        // A quiet stretch longer than the window resets the count, so
        // the full budget is available again.
        clock.advance(31_000);
        for _ in 0..5 {
            assert!(trigger
                .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::High))
                .await
                .unwrap()
                .is_sent());
            clock.advance(2_000);
        }
    }

    #[tokio::test]
    async fn health_drops_alert_with_escalation() {
        let (clock, _store, trigger) = harness(AlertConfig::default());

        // First observation only establishes the reference.
        assert!(trigger.record_health_score(90.0).await.unwrap().is_none());

        // A 15-point drop warns.
        clock.advance(1_000);
        let warn = trigger.record_health_score(75.0).await.unwrap().unwrap();
        assert_eq!(warn.level, AlertLevel::Warning);
        assert!(warn.anomaly_id.starts_with("health-score-"));
        assert!(warn.message.contains("90.0"));

        // Another drop inside the dedup window stays quiet.
        clock.advance(1_000);
        assert!(trigger.record_health_score(55.0).await.unwrap().is_none());

        // After the window, a 25-point drop is critical.
        clock.advance(AlertConfig::default().deduplication_window_ms as i64 + 1);
        let crit = trigger.record_health_score(30.0).await.unwrap().unwrap();
        assert_eq!(crit.level, AlertLevel::Critical);
    }

    #[tokio::test]
    async fn health_improvement_stays_quiet() {
        let (clock, _store, trigger) = harness(AlertConfig::default());
        assert!(trigger.record_health_score(70.0).await.unwrap().is_none());
        clock.advance(1_000);
        assert!(trigger.record_health_score(95.0).await.unwrap().is_none());
        clock.advance(1_000);
        // A small dip below the warn threshold also passes.
        assert!(trigger.record_health_score(88.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acknowledge_marks_and_is_idempotent() {
        let (clock, store, trigger) = harness(AlertConfig::default());
        let AlertDecision::Sent(alert) = trigger
            .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::High))
            .await
            .unwrap()
        else {
            panic!("expected sent");
        };

        clock.advance(5_000);
        let acked = trigger.acknowledge(&alert.id).await.unwrap();
        assert!(acked.acknowledged);
        let first_ack_at = acked.acknowledged_at.unwrap();

        clock.advance(5_000);
        let again = trigger.acknowledge(&alert.id).await.unwrap();
        assert_eq!(again.acknowledged_at, Some(first_ack_at));

        assert!(store.alerts(false).await.unwrap().is_empty());

        let missing = trigger.acknowledge("alert-nope").await;
        assert!(matches!(missing, Err(PulseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn acknowledge_all_sweeps_pending_alerts() {
        let (clock, _store, trigger) = harness(AlertConfig::default());
        for metric in ["a", "b", "c"] {
            assert!(trigger
                .process_anomaly(&test_anomaly(metric, SeverityLevel::High))
                .await
                .unwrap()
                .is_sent());
        }
        clock.advance(1_000);
        assert_eq!(trigger.acknowledge_all().await.unwrap(), 3);
        assert_eq!(trigger.acknowledge_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_prunes_stale_alerts_and_state() {
        let (clock, store, trigger) = harness(AlertConfig::default());
        assert!(trigger
            .process_anomaly(&test_anomaly("pass_rate", SeverityLevel::High))
            .await
            .unwrap()
            .is_sent());

        // Not old enough yet.
        clock.advance(AlertConfig::default().deduplication_window_ms as i64);
        assert_eq!(trigger.cleanup().await.unwrap(), 0);

        clock.advance(AlertConfig::default().deduplication_window_ms as i64 + 1);
        assert_eq!(trigger.cleanup().await.unwrap(), 1);
        assert!(store.alerts(true).await.unwrap().is_empty());
    }

    #[test]
    fn dedup_scope_takes_two_segments() {
        assert_eq!(dedup_scope("anomaly-pass_rate-18c9a2"), "anomaly-pass_rate");
        assert_eq!(dedup_scope("health-score-42"), "health-score");
        assert_eq!(dedup_scope("plain"), "plain");
    }
}
