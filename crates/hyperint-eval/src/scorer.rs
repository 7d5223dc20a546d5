//! Entropy-based uncertainty of one candidate task's interval logits.
//!
//! For logits `[lower, middle, upper]` of a single sample under one task's
//! generated weights:
//!
//! ```text
//! p      = softmax(middle)
//! factor = 1                               (vanilla)
//!        = 1 / (eps + |upper - lower|)     (interval, element-wise)
//! score  = -sum(factor * p * ln p)
//! ```
//!
//! The interval factor grows as an output's interval narrows, so outputs
//! with tight bounds dominate the weighted entropy. When the interval
//! collapses to a point the score is exactly `vanilla / eps`.
//!
//! `ln p` is evaluated as `ln(max(p, PROB_FLOOR))`. An entry that underflows
//! to zero therefore contributes `0 * ln(PROB_FLOOR) = 0`, the usual
//! `0 ln 0 = 0` convention, instead of NaN.

use hyperint_core::{HyperintError, IntervalSlot, Result, INTERVAL_ARITY};
use ndarray::{Array1, ArrayView1, ArrayView2, Zip};

/// Added to the interval width before inverting it.
pub const INTERVAL_EPS: f32 = 1e-4;

/// Lower clamp for probabilities fed to the logarithm.
pub const PROB_FLOOR: f32 = 1e-12;

/// Numerically stable softmax (max-subtracted).
pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    if logits.is_empty() {
        return Array1::zeros(0);
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps = logits.mapv(|v| (v - max).exp());
    let sum = exps.sum();
    exps / sum
}

/// Shannon entropy (nats) of a probability vector, with the log guard.
pub fn entropy(probs: ArrayView1<f32>) -> f32 {
    -probs.iter().map(|&p| p * p.max(PROB_FLOOR).ln()).sum::<f32>()
}

/// Uncertainty of one candidate task for one sample.
///
/// `task_logits` has shape `(3, num_outputs)` in `[lower, middle, upper]`
/// order. With `vanilla` set only the middle row is read.
///
/// The result is finite and non-negative; NaN or infinite middle logits, or
/// bounds that make the weighted sum non-finite, fail with
/// `NumericalInstability`.
pub fn uncertainty(task_logits: ArrayView2<f32>, vanilla: bool) -> Result<f32> {
    if task_logits.nrows() != INTERVAL_ARITY {
        return Err(HyperintError::shape_mismatch(
            "candidate interval logits",
            vec![INTERVAL_ARITY, task_logits.ncols()],
            task_logits.shape().to_vec(),
        ));
    }
    if task_logits.ncols() == 0 {
        return Err(HyperintError::InvalidSpec(
            "Cannot score a head with zero outputs".to_string(),
        ));
    }

    let middle = task_logits.row(IntervalSlot::Middle.index());
    if middle.iter().any(|v| !v.is_finite()) {
        return Err(HyperintError::NumericalInstability(format!(
            "Non-finite middle logits: {:?}",
            middle
        )));
    }
    let probs = softmax(middle);

    let score = if vanilla {
        entropy(probs.view())
    } else {
        let lower = task_logits.row(IntervalSlot::Lower.index());
        let upper = task_logits.row(IntervalSlot::Upper.index());
        let mut acc = 0.0f32;
        Zip::from(&probs)
            .and(&lower)
            .and(&upper)
            .for_each(|&p, &l, &u| {
                let factor = 1.0 / (INTERVAL_EPS + (u - l).abs());
                acc += factor * p * p.max(PROB_FLOOR).ln();
            });
        -acc
    };

    if !score.is_finite() {
        return Err(HyperintError::NumericalInstability(format!(
            "Uncertainty is {} for logits {:?}",
            score, task_logits
        )));
    }
    // Rounding can leave a tiny negative value for one-hot distributions.
    Ok(score.max(0.0))
}
