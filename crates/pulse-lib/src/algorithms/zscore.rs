//! Z-score detection, plain and modified.

use crate::algorithms::{AlgorithmKind, Detect, DetectionContext, Verdict};
use crate::stats;

/// Consistency constant relating MAD to sigma for normal data.
const MODIFIED_Z_SCALE: f64 = 0.6745;
/// Below this much history the modified z-score is skipped; the median
/// and MAD of a handful of points are too jumpy to trust.
const MIN_HISTORY_FOR_MODIFIED: usize = 5;

/// Flags values whose z-score against the baseline, or modified
/// z-score against the history median, crosses the sensitivity
/// threshold. When both are computable the stronger signal wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZScoreDetector;

impl Detect for ZScoreDetector {
    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Option<Verdict> {
        let threshold = ctx.sensitivity.zscore_threshold();
        let mut best: Option<(f64, f64, &'static str)> = None;

        if ctx.baseline.std_dev > 0.0 {
            let z = (ctx.value - ctx.baseline.mean) / ctx.baseline.std_dev;
            best = Some((z, ctx.baseline.mean, "mean"));
        }

        if ctx.history.len() >= MIN_HISTORY_FOR_MODIFIED {
            let med = stats::median(ctx.history);
            let mad = stats::mad(ctx.history);
            if mad > 0.0 {
                let mz = MODIFIED_Z_SCALE * (ctx.value - med) / mad;
                let stronger = match best {
                    Some((z, _, _)) => mz.abs() > z.abs(),
                    None => true,
                };
                if stronger {
                    best = Some((mz, med, "median"));
                }
            }
        }

        // Flat baseline and flat history: no z-score is defined.
        // Report a quiet zero-deviation verdict and leave the
        // collapsed case to the fence-based detectors.
        let Some((z, expected, anchor)) = best else {
            return Some(Verdict {
                kind: AlgorithmKind::ZScore,
                flagged: false,
                deviation: 0.0,
                strength: 0.0,
                expected: ctx.baseline.mean,
                detail: format!(
                    "value {:.3} has no spread to score against",
                    ctx.value
                ),
            });
        };
        let direction = if z >= 0.0 { "above" } else { "below" };
        Some(Verdict {
            kind: AlgorithmKind::ZScore,
            flagged: z.abs() > threshold,
            deviation: z,
            strength: z.abs() / threshold,
            expected,
            detail: format!(
                "value {:.3} sits {:.2} sigmas {} the {} {:.3}",
                ctx.value,
                z.abs(),
                direction,
                anchor,
                expected
            ),
        })
    }
}
