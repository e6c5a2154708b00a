//! Detection algorithm ensemble
//!
//! Numeric detectors consume a [`DetectionContext`] and either abstain
//! (not enough data) or return a [`Verdict`]. Pattern analysis over
//! pass/fail run histories lives in [`patterns`] and is driven
//! separately, since it never sees numeric baselines.

mod iqr;
mod moving_average;
pub mod patterns;
mod zscore;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use iqr::IqrDetector;
pub use moving_average::MovingAverageDetector;
pub use zscore::ZScoreDetector;

use crate::config::Sensitivity;
use crate::models::Baseline;

/// Identifies one member of the ensemble.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    ZScore,
    Iqr,
    MovingAverage,
    /// Pass/fail pattern analysis (failure streaks, flakiness).
    Patterns,
}

impl AlgorithmKind {
    pub fn all() -> BTreeSet<AlgorithmKind> {
        [
            AlgorithmKind::ZScore,
            AlgorithmKind::Iqr,
            AlgorithmKind::MovingAverage,
            AlgorithmKind::Patterns,
        ]
        .into_iter()
        .collect()
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlgorithmKind::ZScore => "z_score",
            AlgorithmKind::Iqr => "iqr",
            AlgorithmKind::MovingAverage => "moving_average",
            AlgorithmKind::Patterns => "patterns",
        };
        write!(f, "{}", s)
    }
}

/// Everything a numeric detector may look at for one evaluation.
///
/// `value` and `history` are already deseasonalized when a seasonal
/// profile exists; detectors never see raw seasonal swings.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    /// The value under test.
    pub value: f64,
    /// Time-ordered history, oldest first. Excludes `value`.
    pub history: &'a [f64],
    pub baseline: &'a Baseline,
    pub sensitivity: Sensitivity,
}

/// One algorithm's opinion about a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub kind: AlgorithmKind,
    pub flagged: bool,
    /// Signed distance from the expectation, in the algorithm's units
    /// (sigmas for z-score and bands, IQR widths for fences).
    pub deviation: f64,
    /// |deviation| relative to the flag threshold; at least 1.0 when
    /// flagged. The ensemble promotes the strongest verdict.
    pub strength: f64,
    /// What the algorithm expected the value to be.
    pub expected: f64,
    /// One human-readable sentence for descriptions and alert messages.
    pub detail: String,
}

/// A numeric detector: abstains with `None` when it lacks the data to
/// form an opinion.
pub trait Detect {
    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Option<Verdict>;
}

/// Tagged dispatch over the numeric ensemble members.
#[derive(Debug, Clone)]
pub enum Algorithm {
    ZScore(ZScoreDetector),
    Iqr(IqrDetector),
    MovingAverage(MovingAverageDetector),
}

impl Algorithm {
    /// The numeric detector for a kind. [`AlgorithmKind::Patterns`] has
    /// no numeric form and yields `None`.
    pub fn for_kind(kind: AlgorithmKind) -> Option<Algorithm> {
        match kind {
            AlgorithmKind::ZScore => Some(Algorithm::ZScore(ZScoreDetector::default())),
            AlgorithmKind::Iqr => Some(Algorithm::Iqr(IqrDetector::default())),
            AlgorithmKind::MovingAverage => {
                Some(Algorithm::MovingAverage(MovingAverageDetector::default()))
            }
            AlgorithmKind::Patterns => None,
        }
    }

    /// Instantiate the numeric detectors for an enabled-set, preserving
    /// the set's order.
    pub fn ensemble(kinds: &BTreeSet<AlgorithmKind>) -> Vec<Algorithm> {
        kinds.iter().filter_map(|k| Algorithm::for_kind(*k)).collect()
    }

    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Algorithm::ZScore(_) => AlgorithmKind::ZScore,
            Algorithm::Iqr(_) => AlgorithmKind::Iqr,
            Algorithm::MovingAverage(_) => AlgorithmKind::MovingAverage,
        }
    }

    pub fn evaluate(&self, ctx: &DetectionContext<'_>) -> Option<Verdict> {
        match self {
            Algorithm::ZScore(d) => d.evaluate(ctx),
            Algorithm::Iqr(d) => d.evaluate(ctx),
            Algorithm::MovingAverage(d) => d.evaluate(ctx),
        }
    }
}
