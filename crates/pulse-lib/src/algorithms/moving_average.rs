//! Moving-average band detection.

use crate::algorithms::{AlgorithmKind, Detect, DetectionContext, Verdict};
use crate::stats;

const DEFAULT_WINDOW: usize = 20;
/// Fewer recent points than this and the rolling band is too noisy to
/// act on.
const MIN_HISTORY: usize = 10;

/// Flags values outside a band of `k` rolling sigmas around the moving
/// average of the most recent history.
#[derive(Debug, Clone, Copy)]
pub struct MovingAverageDetector {
    window: usize,
}

impl MovingAverageDetector {
    pub fn with_window(window: usize) -> Self {
        Self { window: window.max(2) }
    }
}

impl Default for MovingAverageDetector {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
        }
    }
}

impl Detect for MovingAverageDetector {
    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Option<Verdict> {
        if ctx.history.len() < MIN_HISTORY {
            return None;
        }
        let tail_start = ctx.history.len().saturating_sub(self.window);
        let tail = &ctx.history[tail_start..];
        let m = stats::mean(tail);
        let sd = stats::std_dev(tail);
        let k = ctx.sensitivity.band_multiplier();

        if sd <= f64::EPSILON {
            let off = ctx.value - m;
            if off.abs() <= f64::EPSILON {
                return Some(Verdict {
                    kind: AlgorithmKind::MovingAverage,
                    flagged: false,
                    deviation: 0.0,
                    strength: 0.0,
                    expected: m,
                    detail: format!("value {:.3} matches a flat rolling average {:.3}", ctx.value, m),
                });
            }
            return Some(Verdict {
                kind: AlgorithmKind::MovingAverage,
                flagged: true,
                deviation: off,
                strength: (1.0 + off.abs()).min(10.0),
                expected: m,
                detail: format!(
                    "value {:.3} departs from a flat rolling average {:.3}",
                    ctx.value, m
                ),
            });
        }

        let dev = (ctx.value - m) / sd;
        let direction = if dev >= 0.0 { "above" } else { "below" };
        Some(Verdict {
            kind: AlgorithmKind::MovingAverage,
            flagged: dev.abs() >= k,
            deviation: dev,
            strength: dev.abs() / k,
            expected: m,
            detail: format!(
                "value {:.3} sits {:.2} rolling sigmas {} the {}-point average {:.3}",
                ctx.value,
                dev.abs(),
                direction,
                tail.len(),
                m
            ),
        })
    }
}
