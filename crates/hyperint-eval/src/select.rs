//! Task selection and per-sample prediction.
//!
//! For every sample the candidate task with the lowest uncertainty wins;
//! the winning task's middle logits then give the task-relative class,
//! which the [`ClassTranslator`] maps to a global label.

use crate::scorer::uncertainty;
use crate::translate::ClassTranslator;
use hyperint_core::{HyperintError, IntervalSlot, LogitsTensor, Result};
use ndarray::{ArrayView1, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Index of the smallest uncertainty. Ties go to the lowest index.
///
/// Fails on an empty slice and on NaN scores.
pub fn select_task(uncertainties: &[f32]) -> Result<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &score) in uncertainties.iter().enumerate() {
        if score.is_nan() {
            return Err(HyperintError::NumericalInstability(format!(
                "Uncertainty of candidate task {} is NaN",
                idx
            )));
        }
        match best {
            Some((_, current)) if score >= current => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx).ok_or_else(|| {
        HyperintError::InvalidSpec("Cannot select a task from zero candidates".to_string())
    })
}

/// Index of the largest logit. Ties go to the lowest index.
pub fn argmax(logits: ArrayView1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &v) in logits.iter().enumerate() {
        match best {
            Some((_, current)) if v <= current => {}
            _ => best = Some((idx, v)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Prediction for one test sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePrediction {
    pub task: usize,
    /// Class index within the predicted task's head.
    pub relative_class: usize,
    /// Dataset-global class label.
    pub class: usize,
    /// Uncertainty of the predicted task.
    pub uncertainty: f32,
}

/// Predict task and class for one sample's `(num_tasks, 3, num_outputs)` logits.
pub fn predict_sample(
    sample: ArrayView3<f32>,
    vanilla: bool,
    translator: &ClassTranslator,
) -> Result<SamplePrediction> {
    let scores = sample
        .outer_iter()
        .map(|candidate| uncertainty(candidate, vanilla))
        .collect::<Result<Vec<_>>>()?;
    let task = select_task(&scores)?;

    let middle = sample
        .index_axis(Axis(0), task)
        .index_axis_move(Axis(0), IntervalSlot::Middle.index());
    let relative_class = argmax(middle).ok_or_else(|| {
        HyperintError::InvalidSpec("Target network head has no outputs".to_string())
    })?;
    let class = translator.translate(relative_class, task)?;
    trace!(task, relative_class, class, "Sample prediction");

    Ok(SamplePrediction {
        task,
        relative_class,
        class,
        uncertainty: scores[task],
    })
}

/// Configuration for per-sample parallel prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Minimum number of samples before enabling parallelism.
    /// Below this threshold, serial execution is used to avoid overhead.
    pub min_samples_for_parallel: usize,

    /// Maximum number of threads to use.
    /// None means use rayon's default (typically number of cores).
    pub max_threads: Option<usize>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            min_samples_for_parallel: 256,
            max_threads: None,
        }
    }
}

impl ParallelConfig {
    /// Always serial.
    pub fn serial() -> Self {
        Self {
            min_samples_for_parallel: usize::MAX,
            max_threads: None,
        }
    }
}

/// Predict every sample of a logits tensor.
///
/// Predictions come back in sample order whether or not the work was split
/// across threads.
pub fn predict_all(
    logits: &LogitsTensor,
    vanilla: bool,
    translator: &ClassTranslator,
    parallel: &ParallelConfig,
) -> Result<Vec<SamplePrediction>> {
    let num_samples = logits.num_samples();
    if num_samples < parallel.min_samples_for_parallel {
        return (0..num_samples)
            .map(|s| predict_sample(logits.sample(s), vanilla, translator))
            .collect();
    }

    debug!(
        num_samples,
        max_threads = ?parallel.max_threads,
        "Predicting samples in parallel"
    );
    let run = || {
        (0..num_samples)
            .into_par_iter()
            .map(|s| predict_sample(logits.sample(s), vanilla, translator))
            .collect::<Result<Vec<_>>>()
    };
    match parallel.max_threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| HyperintError::InvalidSpec(format!("Failed to build thread pool: {}", e)))?;
            pool.install(run)
        }
        None => run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperint_core::DatasetKind;
    use ndarray::{arr1, Array4};
    use proptest::prelude::*;

    #[test]
    fn test_select_minimum() {
        assert_eq!(select_task(&[0.9, 0.3, 0.5]).unwrap(), 1);
    }

    #[test]
    fn test_select_tie_goes_to_lowest_index() {
        assert_eq!(select_task(&[0.3, 0.3, 0.5]).unwrap(), 0);
        assert_eq!(select_task(&[0.5, 0.1, 0.1]).unwrap(), 1);
    }

    #[test]
    fn test_select_single_candidate() {
        assert_eq!(select_task(&[2.0]).unwrap(), 0);
    }

    #[test]
    fn test_select_rejects_empty_and_nan() {
        assert!(matches!(select_task(&[]), Err(HyperintError::InvalidSpec(_))));
        assert!(matches!(
            select_task(&[0.1, f32::NAN]),
            Err(HyperintError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_argmax_first_of_ties() {
        assert_eq!(argmax(arr1(&[1.0, 3.0, 3.0]).view()), Some(1));
        assert_eq!(argmax(arr1(&[]).view()), None);
    }

    /// Two tasks, `n` samples, two outputs. Samples in the first half are
    /// confident under task 0, the rest under task 1.
    fn synthetic_logits(n: usize) -> LogitsTensor {
        let data = Array4::from_shape_fn((2, n, 3, 2), |(task, sample, _, out)| {
            let owner = usize::from(sample >= n / 2);
            match (task == owner, out) {
                (true, 0) => 8.0,
                (true, _) => -8.0,
                (false, _) => 0.0,
            }
        });
        LogitsTensor::from_array(data).unwrap()
    }

    #[test]
    fn test_predict_sample_picks_confident_task() {
        let logits = synthetic_logits(4);
        let translator = ClassTranslator::new(DatasetKind::SplitMnist, 2).unwrap();
        let pred = predict_sample(logits.sample(3), false, &translator).unwrap();
        assert_eq!(pred.task, 1);
        assert_eq!(pred.relative_class, 0);
        assert_eq!(pred.class, 2);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let logits = synthetic_logits(64);
        let translator = ClassTranslator::new(DatasetKind::SplitMnist, 2).unwrap();
        let serial = predict_all(&logits, true, &translator, &ParallelConfig::serial()).unwrap();
        let parallel = ParallelConfig {
            min_samples_for_parallel: 1,
            max_threads: Some(3),
        };
        let par = predict_all(&logits, true, &translator, &parallel).unwrap();
        assert_eq!(serial, par);
        assert_eq!(serial.len(), 64);
        assert!(serial[..32].iter().all(|p| p.task == 0));
        assert!(serial[32..].iter().all(|p| p.task == 1));
    }

    #[test]
    fn test_translation_error_propagates() {
        // Split MNIST heads have two classes; a third output can win argmax.
        let data = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, _, out)| out as f32);
        let logits = LogitsTensor::from_array(data).unwrap();
        let translator = ClassTranslator::new(DatasetKind::SplitMnist, 1).unwrap();
        let err = predict_all(&logits, true, &translator, &ParallelConfig::default()).unwrap_err();
        assert!(matches!(err, HyperintError::InvalidSpec(_)));
    }

    proptest! {
        #[test]
        fn selected_task_has_minimal_score(scores in prop::collection::vec(0.0f32..10.0, 1..20)) {
            let idx = select_task(&scores).unwrap();
            prop_assert!(scores.iter().all(|&s| s >= scores[idx]));
            prop_assert!(scores[..idx].iter().all(|&s| s > scores[idx]));
        }

        #[test]
        fn duplicating_the_winner_keeps_first(scores in prop::collection::vec(0.0f32..10.0, 1..20)) {
            let idx = select_task(&scores).unwrap();
            let mut extended = scores.clone();
            extended.push(scores[idx]);
            prop_assert_eq!(select_task(&extended).unwrap(), idx);
        }
    }
}
