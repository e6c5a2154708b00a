//! Pass/fail pattern analysis for individual test cases.
//!
//! These detectors look at run outcomes, not metric values: trailing
//! failure streaks and pass/fail flapping. A case that fails every
//! single run is broken, not flaky, and only trips the streak signal.

use crate::config::Sensitivity;
use crate::models::{AnomalyType, CaseRun};

/// Trailing failures required before a streak signal fires.
pub const MIN_STREAK: usize = 3;
/// Runs required before the flakiness ratio means anything.
pub const MIN_RUNS_FOR_FLAKINESS: usize = 6;

/// Pass-rate band (exclusive) inside which flapping counts as flaky.
const FLAKY_PASS_RATE_LO: f64 = 0.2;
const FLAKY_PASS_RATE_HI: f64 = 0.8;

/// One pattern finding for a case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseSignal {
    pub anomaly_type: AnomalyType,
    /// Streak length for failure streaks, alternation ratio for
    /// flakiness.
    pub deviation: f64,
    pub detail: String,
}

/// Length of the failure streak at the tail of a time-ordered history.
pub fn consecutive_failures(runs: &[CaseRun]) -> usize {
    runs.iter().rev().take_while(|r| !r.passed).count()
}

/// Outcome alternation ratio: transitions divided by `n - 1`. A
/// perfectly flapping case scores 1.0, a stable one 0.0.
pub fn flakiness_score(runs: &[CaseRun]) -> f64 {
    if runs.len() < 2 {
        return 0.0;
    }
    let transitions = runs
        .windows(2)
        .filter(|w| w[0].passed != w[1].passed)
        .count();
    transitions as f64 / (runs.len() - 1) as f64
}

pub fn pass_rate(runs: &[CaseRun]) -> f64 {
    if runs.is_empty() {
        return 0.0;
    }
    runs.iter().filter(|r| r.passed).count() as f64 / runs.len() as f64
}

/// Run both pattern detectors over a case history. Input order does
/// not matter; runs are sorted by timestamp before analysis.
pub fn evaluate_case(runs: &[CaseRun], sensitivity: Sensitivity) -> Vec<CaseSignal> {
    let mut ordered = runs.to_vec();
    ordered.sort_by_key(|r| r.timestamp);

    let mut signals = Vec::new();

    let streak = consecutive_failures(&ordered);
    if streak >= MIN_STREAK {
        signals.push(CaseSignal {
            anomaly_type: AnomalyType::FailureSpike,
            deviation: streak as f64,
            detail: format!("failed the last {} consecutive runs", streak),
        });
    }

    if ordered.len() >= MIN_RUNS_FOR_FLAKINESS {
        let score = flakiness_score(&ordered);
        let rate = pass_rate(&ordered);
        if score >= sensitivity.flakiness_threshold()
            && rate > FLAKY_PASS_RATE_LO
            && rate < FLAKY_PASS_RATE_HI
        {
            signals.push(CaseSignal {
                anomaly_type: AnomalyType::FlakyPattern,
                deviation: score,
                detail: format!(
                    "alternated outcomes in {:.0}% of run transitions with a {:.0}% pass rate",
                    score * 100.0,
                    rate * 100.0
                ),
            });
        }
    }

    signals
}
