//! Severity scoring
//!
//! Combines weighted deviation, duration, frequency and scope factors
//! into a 0-100 score, adds regression and streak bonuses, scales by
//! anomaly type and buckets the result into a [`SeverityLevel`].
//! Companion helpers derive an impact assessment (blast radius and
//! urgency) and a single sortable priority for queue ordering.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SeverityWeights;
use crate::models::{Anomaly, AnomalyType, SeverityLevel, SuiteStatus};

const REGRESSION_BONUS: f64 = 15.0;
const STREAK_BONUS_MAX: f64 = 10.0;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Everything the scorer knows about one anomaly.
#[derive(Debug, Clone, PartialEq)]
pub struct SeverityInput {
    pub anomaly_type: AnomalyType,
    /// Deviation magnitude in sigma-equivalents.
    pub deviation_sigmas: f64,
    /// How long the condition has persisted.
    pub duration_ms: u64,
    /// Occurrences of this anomaly on this metric in the recent window.
    pub frequency: u32,
    /// Fraction of the suite affected, when known.
    pub affected_ratio: Option<f64>,
    /// True when the metric regressed against a known-good period.
    pub regression: bool,
    /// Trailing consecutive failures, when the anomaly came from runs.
    pub consecutive_failures: usize,
}

/// One factor's contribution to a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityFactor {
    pub name: String,
    /// Normalized factor value, 0-1.
    pub value: f64,
    pub weight: f64,
    /// `value * weight * 100`, the points this factor added.
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityResult {
    pub severity: SeverityLevel,
    /// Final score, clamped to 0-100.
    pub score: f64,
    pub factors: Vec<SeverityFactor>,
    pub recommendation: String,
}

/// How much of the suite an anomaly touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactScope {
    Isolated,
    Moderate,
    Widespread,
    Critical,
}

impl ImpactScope {
    /// Points this scope adds to the triage priority.
    fn priority_points(self) -> i64 {
        match self {
            ImpactScope::Isolated => 0,
            ImpactScope::Moderate => 5,
            ImpactScope::Widespread => 10,
            ImpactScope::Critical => 15,
        }
    }
}

/// How soon someone should look at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Scheduled,
    Prompt,
    Immediate,
}

/// Scope and urgency for one anomaly, derived from its severity input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub scope: ImpactScope,
    pub urgency: Urgency,
    pub summary: String,
}

/// Scores anomalies with a fixed set of weights.
#[derive(Debug, Clone)]
pub struct SeverityEvaluator {
    weights: SeverityWeights,
}

impl SeverityEvaluator {
    pub fn new(weights: SeverityWeights) -> Self {
        Self { weights }
    }

    pub fn evaluate(&self, input: &SeverityInput) -> SeverityResult {
        let w = &self.weights;
        let factors = vec![
            factor("deviation", deviation_factor(input.deviation_sigmas), w.deviation),
            factor("duration", duration_factor(input.duration_ms), w.duration),
            factor("frequency", frequency_factor(input.frequency), w.frequency),
            factor("scope", scope_factor(input.affected_ratio), w.scope),
        ];

        let mut subtotal: f64 = factors.iter().map(|f| f.contribution).sum();
        if input.regression {
            subtotal += REGRESSION_BONUS;
        }
        if input.consecutive_failures > 0 {
            let streak = input.consecutive_failures as f64;
            subtotal += streak.log10().min(1.0).max(0.0) * STREAK_BONUS_MAX;
        }

        let score = (subtotal * type_multiplier(input.anomaly_type)).clamp(0.0, 100.0);
        let severity = bucket(score);
        debug!(
            anomaly_type = %input.anomaly_type,
            score,
            severity = %severity,
            "severity evaluated"
        );
        SeverityResult {
            severity,
            score,
            factors,
            recommendation: recommendation(input.anomaly_type).to_string(),
        }
    }

    /// Blast radius and urgency for one anomaly. A regression that
    /// touches most of the suite is the only combination treated as
    /// drop-everything urgent.
    pub fn assess_impact(
        &self,
        input: &SeverityInput,
        result: &SeverityResult,
    ) -> ImpactAssessment {
        let scope = impact_scope(input.affected_ratio);
        let urgency = if scope == ImpactScope::Critical && input.regression {
            Urgency::Immediate
        } else {
            match result.severity {
                SeverityLevel::Critical => Urgency::Prompt,
                SeverityLevel::High => Urgency::Scheduled,
                _ => Urgency::Low,
            }
        };
        let summary = match input.affected_ratio {
            Some(r) => format!(
                "{:?} impact: {:.0}% of the suite affected, {:?} attention.",
                scope,
                r.clamp(0.0, 1.0) * 100.0,
                urgency
            ),
            None => format!("Single-metric impact, {:?} attention.", urgency),
        };
        ImpactAssessment {
            scope,
            urgency,
            summary,
        }
    }

    /// Collapse a set of anomalies into one suite verdict. Resolved
    /// anomalies no longer count.
    pub fn suite_status(&self, anomalies: &[Anomaly]) -> SuiteStatus {
        let active: Vec<&Anomaly> = anomalies.iter().filter(|a| a.is_active()).collect();
        if active.iter().any(|a| a.severity.is_urgent()) {
            SuiteStatus::Critical
        } else if active.is_empty() {
            SuiteStatus::Normal
        } else {
            SuiteStatus::Warning
        }
    }
}

fn impact_scope(affected_ratio: Option<f64>) -> ImpactScope {
    let Some(r) = affected_ratio else {
        return ImpactScope::Isolated;
    };
    match r.clamp(0.0, 1.0) {
        r if r < 0.05 => ImpactScope::Isolated,
        r if r < 0.2 => ImpactScope::Moderate,
        r if r < 0.5 => ImpactScope::Widespread,
        _ => ImpactScope::Critical,
    }
}

/// Fold score, regression, impact scope and a recurrence penalty into
/// one sortable number. Higher goes first: severity dominates,
/// regressions jump the queue, chronically recurring issues sink.
pub fn calculate_priority(result: &SeverityResult, input: &SeverityInput) -> i64 {
    let mut priority = result.score.round() as i64;
    if input.regression {
        priority += 25;
    }
    priority += impact_scope(input.affected_ratio).priority_points();
    priority -= (input.frequency as i64).min(20);
    priority.max(0)
}

fn factor(name: &str, value: f64, weight: f64) -> SeverityFactor {
    SeverityFactor {
        name: name.to_string(),
        value,
        weight,
        contribution: value * weight * 100.0,
    }
}

fn bucket(score: f64) -> SeverityLevel {
    match score {
        s if s >= 80.0 => SeverityLevel::Critical,
        s if s >= 60.0 => SeverityLevel::High,
        s if s >= 40.0 => SeverityLevel::Medium,
        _ => SeverityLevel::Low,
    }
}

/// Piecewise map from sigmas to 0-1, saturating at 8 sigmas.
fn deviation_factor(sigmas: f64) -> f64 {
    let z = sigmas.abs();
    match z {
        z if z < 2.0 => 0.25 * z,
        z if z < 3.0 => 0.5 + 0.25 * (z - 2.0),
        z if z < 4.0 => 0.75 + 0.15 * (z - 3.0),
        z => 0.9 + 0.1 * ((z - 4.0) / 4.0).min(1.0),
    }
}

/// Piecewise map from persistence to 0-1, saturating at 48 hours.
fn duration_factor(duration_ms: u64) -> f64 {
    let h = duration_ms as f64 / MS_PER_HOUR;
    match h {
        h if h < 1.0 => 0.3 * h,
        h if h < 6.0 => 0.3 + 0.3 * (h - 1.0) / 5.0,
        h if h < 24.0 => 0.6 + 0.3 * (h - 6.0) / 18.0,
        h => 0.9 + 0.1 * ((h - 24.0) / 24.0).min(1.0),
    }
}

/// Square-root growth: 100 recent occurrences saturate the factor.
fn frequency_factor(frequency: u32) -> f64 {
    ((frequency as f64).sqrt() / 10.0).min(1.0)
}

/// Affected-fraction map with inflections at 5%, 20% and 50% of the
/// suite. Unknown scope contributes nothing.
fn scope_factor(affected_ratio: Option<f64>) -> f64 {
    let Some(r) = affected_ratio else {
        return 0.0;
    };
    let r = r.clamp(0.0, 1.0);
    match r {
        r if r < 0.05 => 0.25 * r / 0.05,
        r if r < 0.2 => 0.25 + 0.35 * (r - 0.05) / 0.15,
        r if r < 0.5 => 0.6 + 0.3 * (r - 0.2) / 0.3,
        r => 0.9 + 0.1 * (r - 0.5) / 0.5,
    }
}

fn type_multiplier(anomaly_type: AnomalyType) -> f64 {
    match anomaly_type {
        AnomalyType::FailureSpike => 1.3,
        AnomalyType::SuccessRateDrop => 1.2,
        AnomalyType::ResourceAnomaly => 1.1,
        AnomalyType::DurationSpike => 1.0,
        AnomalyType::PerformanceDegradation => 1.0,
        AnomalyType::TrendChange => 0.9,
        AnomalyType::FlakyPattern => 0.9,
        AnomalyType::SeasonalDeviation => 0.7,
    }
}

fn recommendation(anomaly_type: AnomalyType) -> &'static str {
    match anomaly_type {
        AnomalyType::DurationSpike => {
            "Profile the slowest cases and check the runners for resource contention."
        }
        AnomalyType::PerformanceDegradation => {
            "Compare recent runs against the baseline period to isolate where the slowdown began."
        }
        AnomalyType::FailureSpike => {
            "Inspect the most recent code and environment changes; quarantine the failing cases if needed."
        }
        AnomalyType::SuccessRateDrop => {
            "Bisect recent changes against the last known-good run to find the regression."
        }
        AnomalyType::TrendChange => {
            "Review whether the shift is expected; rebuild the baseline if it is."
        }
        AnomalyType::ResourceAnomaly => {
            "Check runner capacity and concurrent load during the affected window."
        }
        AnomalyType::FlakyPattern => {
            "Quarantine the case and look for timing or ordering dependencies."
        }
        AnomalyType::SeasonalDeviation => {
            "Verify whether scheduled jobs or load cycles explain the swing before acting."
        }
    }
}
