//! Interquartile-range fence detection.

use crate::algorithms::{AlgorithmKind, Detect, DetectionContext, Verdict};
use crate::stats;

/// Minimum history length for computing quartiles on the fly when the
/// baseline carries no percentile summary.
const MIN_HISTORY: usize = 4;

/// Flags values outside `[Q1 - k*IQR, Q3 + k*IQR]`. Quartiles come
/// from the baseline's percentile summary when present, otherwise from
/// the history itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct IqrDetector;

impl Detect for IqrDetector {
    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Option<Verdict> {
        let (q1, q2, q3) = match &ctx.baseline.percentiles {
            Some(p) => (p.p25, p.p50, p.p75),
            None if ctx.history.len() >= MIN_HISTORY => stats::quartiles(ctx.history),
            None => return None,
        };
        let iqr = q3 - q1;
        let k = ctx.sensitivity.iqr_multiplier();

        if iqr <= f64::EPSILON {
            // Collapsed fences: the quartiles agree on a single value,
            // so anything that strays from it flags. Deviation is in
            // raw units here, there is no spread to normalize by.
            let off = ctx.value - q2;
            if off.abs() <= f64::EPSILON {
                return Some(Verdict {
                    kind: AlgorithmKind::Iqr,
                    flagged: false,
                    deviation: 0.0,
                    strength: 0.0,
                    expected: q2,
                    detail: format!("value {:.3} matches the collapsed fences at {:.3}", ctx.value, q2),
                });
            }
            return Some(Verdict {
                kind: AlgorithmKind::Iqr,
                flagged: true,
                deviation: off,
                strength: (1.0 + off.abs()).min(10.0),
                expected: q2,
                detail: format!(
                    "value {:.3} departs from a flat series pinned at {:.3}",
                    ctx.value, q2
                ),
            });
        }

        let lo = q1 - k * iqr;
        let hi = q3 + k * iqr;
        let flagged = ctx.value > hi || ctx.value < lo;
        // Deviation counts IQR units past the nearer fence; a value
        // inside the fences is exactly zero off.
        let deviation = if ctx.value > hi {
            (ctx.value - hi) / iqr
        } else if ctx.value < lo {
            (ctx.value - lo) / iqr
        } else {
            0.0
        };
        let strength = if ctx.value >= q2 {
            (ctx.value - q2) / (hi - q2)
        } else {
            (q2 - ctx.value) / (q2 - lo)
        };
        let detail = if ctx.value > hi {
            format!(
                "value {:.3} breaches the upper IQR fence {:.3} (median {:.3})",
                ctx.value, hi, q2
            )
        } else if ctx.value < lo {
            format!(
                "value {:.3} breaches the lower IQR fence {:.3} (median {:.3})",
                ctx.value, lo, q2
            )
        } else {
            format!("value {:.3} sits inside the IQR fences [{:.3}, {:.3}]", ctx.value, lo, hi)
        };
        Some(Verdict {
            kind: AlgorithmKind::Iqr,
            flagged,
            deviation,
            strength,
            expected: q2,
            detail,
        })
    }
}
