//! Task-agnostic evaluation of one trained model.
//!
//! For every task `t` the driver loads `t`'s test set, produces interval
//! logits under each candidate task's generated weights, lets the
//! lowest-uncertainty candidate pick the task of each sample and scores
//! both the task and the class predictions against the ground truth.

use crate::data::TestSetProvider;
use crate::producer::IntervalLogitProducer;
use crate::results::{ResultTable, TaskAccuracy, TaskFailure};
use crate::select::{predict_all, ParallelConfig, SamplePrediction};
use crate::translate::{ClassTranslator, PermutedLayout};
use hyperint_core::{HyperintError, LogitsTensor, Result, WeightSet};
use hyperint_nets::{Hypernetwork, TargetNetwork};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Experiment hyperparameters stored alongside a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Dataset identifier, e.g. `"SplitMNIST"`.
    pub dataset: String,
    /// Target network identifier, e.g. `"MLP"`.
    pub target_network: String,
    pub number_of_tasks: usize,
    /// Half-width of the embedding interval.
    #[serde(default)]
    pub alpha: f32,
    #[serde(default)]
    pub full_interval: bool,
    /// Score candidates by plain entropy instead of interval-weighted entropy.
    #[serde(default)]
    pub vanilla_entropy: bool,
    #[serde(default)]
    pub saving_folder: Option<PathBuf>,
    /// CIFAR-100 class order; identity if absent.
    #[serde(default)]
    pub cifar_class_order: Option<Vec<usize>>,
    #[serde(default)]
    pub permuted_layout: PermutedLayout,
}

impl Hyperparameters {
    pub fn translator(&self) -> Result<ClassTranslator> {
        let translator = ClassTranslator::from_name(&self.dataset, self.number_of_tasks)?
            .with_permuted_layout(self.permuted_layout);
        match &self.cifar_class_order {
            Some(order) => translator.with_class_order(order.clone()),
            None => Ok(translator),
        }
    }
}

/// How results are computed and written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Field delimiter of the result tables.
    pub delimiter: char,
    /// Result file name prefix; the model index and extension follow.
    pub file_prefix: String,
    /// Also write each result table as JSON.
    pub write_json: bool,
    pub parallel: ParallelConfig,
    /// Record a failed task and continue instead of aborting the model.
    pub isolate_failures: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            delimiter: ';',
            file_prefix: "entropy_statistics_".to_string(),
            write_json: false,
            parallel: ParallelConfig::default(),
            isolate_failures: false,
        }
    }
}

impl EvaluationConfig {
    /// `entropy_statistics_{model_index}.csv` with the default prefix.
    pub fn result_file_name(&self, model_index: usize) -> String {
        format!("{}{}.csv", self.file_prefix, model_index)
    }
}

/// Everything needed to evaluate one trained model.
pub struct ExperimentBundle {
    pub hypernetwork: Box<dyn Hypernetwork>,
    pub hypernetwork_weights: WeightSet,
    pub target_network: Box<dyn TargetNetwork>,
    pub hyperparameters: Hyperparameters,
    pub test_sets: Box<dyn TestSetProvider>,
}

/// Task and class accuracy (percent) of the predictions for the test set of
/// `task`, scored against the per-sample class and task labels.
pub fn task_accuracy(
    task: usize,
    predictions: &[SamplePrediction],
    labels: &[usize],
    task_labels: &[usize],
) -> Result<TaskAccuracy> {
    if predictions.is_empty() || predictions.len() != labels.len() || predictions.len() != task_labels.len() {
        return Err(HyperintError::InvalidSpec(format!(
            "Cannot score {} predictions against {} labels and {} task labels",
            predictions.len(),
            labels.len(),
            task_labels.len()
        )));
    }
    let n = predictions.len() as f64;
    let task_hits = predictions
        .iter()
        .zip(task_labels)
        .filter(|(p, t)| p.task == **t)
        .count();
    let class_hits = predictions
        .iter()
        .zip(labels)
        .filter(|(p, y)| p.class == **y)
        .count();
    Ok(TaskAccuracy {
        task,
        task_prediction_acc: task_hits as f64 * 100.0 / n,
        class_prediction_acc: class_hits as f64 * 100.0 / n,
    })
}

pub struct Evaluator {
    config: EvaluationConfig,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Evaluate every task of `bundle`.
    ///
    /// Without `isolate_failures` the first failing task aborts the model
    /// with a `TaskFailed` error naming the task.
    #[instrument(skip(self, bundle), fields(dataset = %bundle.hyperparameters.dataset, alpha = bundle.hyperparameters.alpha, num_tasks = bundle.hyperparameters.number_of_tasks))]
    pub fn evaluate(&self, bundle: &ExperimentBundle, model_index: usize) -> Result<ResultTable> {
        let hp = &bundle.hyperparameters;
        let translator = hp.translator()?;
        if hp.number_of_tasks > bundle.hypernetwork.num_tasks() {
            return Err(HyperintError::InvalidSpec(format!(
                "Experiment has {} tasks but the hypernetwork only knows {}",
                hp.number_of_tasks,
                bundle.hypernetwork.num_tasks()
            )));
        }
        let producer = IntervalLogitProducer::new(
            bundle.hypernetwork.as_ref(),
            &bundle.hypernetwork_weights,
            bundle.target_network.as_ref(),
            &hp.target_network,
            hp.alpha,
            hp.full_interval,
        )?;

        let mut table = ResultTable::default();
        for task in 0..hp.number_of_tasks {
            match self.evaluate_task(bundle, &producer, &translator, task) {
                Ok(row) => {
                    info!(
                        task,
                        task_prediction_acc = row.task_prediction_acc,
                        class_prediction_acc = row.class_prediction_acc,
                        "Task evaluated"
                    );
                    table.push(row);
                }
                Err(e) if self.config.isolate_failures => {
                    warn!(task, error = %e, "Task evaluation failed, continuing");
                    table.failures.push(TaskFailure {
                        task,
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e.in_task(task)),
            }
        }
        Ok(table)
    }

    /// Evaluate `bundle` and write its result table into the saving folder.
    ///
    /// `out_dir` overrides the folder named in the hyperparameters; with
    /// neither set nothing is written.
    pub fn evaluate_and_save(
        &self,
        bundle: &ExperimentBundle,
        model_index: usize,
        out_dir: Option<&Path>,
    ) -> Result<ResultTable> {
        let table = self.evaluate(bundle, model_index)?;
        let folder = out_dir.or(bundle.hyperparameters.saving_folder.as_deref());
        if let Some(folder) = folder {
            self.write_results(&table, folder, model_index)?;
        }
        Ok(table)
    }

    /// Write `table` as `{folder}/{prefix}{model_index}.csv` (plus `.json` if enabled).
    pub fn write_results(&self, table: &ResultTable, folder: &Path, model_index: usize) -> Result<PathBuf> {
        fs::create_dir_all(folder)?;
        let path = folder.join(self.config.result_file_name(model_index));
        table.write_delimited(&path, self.config.delimiter)?;
        if self.config.write_json {
            table.write_json(&path.with_extension("json"))?;
        }
        info!(path = %path.display(), rows = table.rows.len(), "Wrote result table");
        Ok(path)
    }

    fn evaluate_task(
        &self,
        bundle: &ExperimentBundle,
        producer: &IntervalLogitProducer<'_>,
        translator: &ClassTranslator,
        task: usize,
    ) -> Result<TaskAccuracy> {
        let test = bundle.test_sets.extract_test_set(task)?;
        test.validate()?;
        if test.is_empty() {
            return Err(HyperintError::InvalidSpec(format!("Test set of task {} is empty", task)));
        }

        let num_candidates = bundle.hyperparameters.number_of_tasks;
        let blocks = (0..num_candidates)
            .map(|candidate| {
                debug!(task, candidate, "Inferring candidate task");
                producer.produce(candidate, &test.x)
            })
            .collect::<Result<Vec<_>>>()?;
        let logits = LogitsTensor::from_candidate_blocks(&blocks)?;

        self.evaluate_logits(
            &logits,
            task,
            &test.y,
            &test.task_labels,
            translator,
            bundle.hyperparameters.vanilla_entropy,
        )
    }

    /// Score an already stacked `(num_tasks, num_samples, 3, num_outputs)`
    /// logits tensor. `task` only labels the resulting row.
    pub fn evaluate_logits(
        &self,
        logits: &LogitsTensor,
        task: usize,
        labels: &[usize],
        task_labels: &[usize],
        translator: &ClassTranslator,
        vanilla: bool,
    ) -> Result<TaskAccuracy> {
        let predictions = predict_all(logits, vanilla, translator, &self.config.parallel)?;
        task_accuracy(task, &predictions, labels, task_labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{InMemoryTestSets, TestSet};
    use hyperint_core::DatasetKind;
    use hyperint_nets::{HmlpConfig, IntervalHmlp, Mlp};
    use ndarray::{Array2, Array4};

    fn hyperparameters(dataset: &str, tasks: usize) -> Hyperparameters {
        Hyperparameters {
            dataset: dataset.to_string(),
            target_network: "MLP".to_string(),
            number_of_tasks: tasks,
            alpha: 0.1,
            full_interval: true,
            vanilla_entropy: false,
            saving_folder: None,
            cifar_class_order: None,
            permuted_layout: PermutedLayout::Shared,
        }
    }

    fn test_set(task: usize, n: usize, width: usize) -> TestSet {
        let x = Array2::from_shape_fn((n, width), |(i, f)| ((i * width + f + task) as f32 * 0.31).cos());
        let y = (0..n).map(|i| 2 * task + i % 2).collect();
        TestSet::for_task(x, y, task).unwrap()
    }

    fn bundle(sets: Vec<TestSet>) -> ExperimentBundle {
        let target = Mlp::new(6, vec![4], 2).unwrap();
        let config = HmlpConfig {
            num_tasks: 2,
            embedding_dim: 3,
            hidden_layers: vec![5],
        };
        let hnet = IntervalHmlp::new(config, target.param_shapes().to_vec()).unwrap();
        let weights = hnet.init_weights(11);
        ExperimentBundle {
            hypernetwork: Box::new(hnet),
            hypernetwork_weights: weights,
            target_network: Box::new(target),
            hyperparameters: hyperparameters("SplitMNIST", 2),
            test_sets: Box::new(InMemoryTestSets::new(sets).unwrap()),
        }
    }

    /// Samples 0-1 are confident under task 0, samples 2-3 under task 1.
    fn synthetic_logits() -> LogitsTensor {
        let data = Array4::from_shape_fn((2, 4, 3, 2), |(task, sample, slot, out)| {
            let owner = sample / 2;
            if task != owner {
                return 0.0;
            }
            let centre = if out == sample % 2 { 6.0 } else { -6.0 };
            centre + (slot as f32 - 1.0) * 0.05
        });
        LogitsTensor::from_array(data).unwrap()
    }

    #[test]
    fn test_synthetic_logits_give_perfect_task_accuracy() {
        let evaluator = Evaluator::new(EvaluationConfig::default());
        let translator = ClassTranslator::new(DatasetKind::SplitMnist, 2).unwrap();
        let logits = synthetic_logits();

        let predictions = predict_all(&logits, false, &translator, &ParallelConfig::serial()).unwrap();
        let tasks: Vec<usize> = predictions.iter().map(|p| p.task).collect();
        assert_eq!(tasks, vec![0, 0, 1, 1]);

        let acc = evaluator
            .evaluate_logits(&logits, 0, &[0, 1, 2, 3], &[0, 0, 1, 1], &translator, false)
            .unwrap();
        assert_eq!(acc.task_prediction_acc, 100.0);
        assert_eq!(acc.class_prediction_acc, 100.0);

        // Same logits, every sample claimed to come from task 0.
        let acc = evaluator
            .evaluate_logits(&logits, 0, &[0, 1, 2, 3], &[0, 0, 0, 0], &translator, false)
            .unwrap();
        assert_eq!(acc.task_prediction_acc, 50.0);
        assert_eq!(acc.class_prediction_acc, 100.0);
    }

    #[test]
    fn test_task_accuracy_counts() {
        let pred = |task, class| SamplePrediction {
            task,
            relative_class: 0,
            class,
            uncertainty: 0.0,
        };
        let preds = [pred(1, 2), pred(1, 3), pred(0, 3), pred(1, 0)];
        let acc = task_accuracy(1, &preds, &[2, 2, 3, 0], &[1, 1, 1, 1]).unwrap();
        assert_eq!(acc.task_prediction_acc, 75.0);
        assert_eq!(acc.class_prediction_acc, 75.0);
        assert!(task_accuracy(1, &[], &[], &[]).is_err());
        assert!(task_accuracy(1, &preds, &[2, 2, 3, 0], &[1, 1]).is_err());
    }

    #[test]
    fn test_stored_task_labels_drive_task_accuracy() {
        let relabelled = |task: usize, label: usize| {
            let set = test_set(task, 6, 6);
            TestSet {
                task_labels: vec![label; set.len()],
                ..set
            }
        };
        let evaluator = Evaluator::new(EvaluationConfig::default());
        let as_zero = evaluator
            .evaluate(&bundle(vec![relabelled(0, 0), test_set(1, 4, 6)]), 0)
            .unwrap();
        let as_one = evaluator
            .evaluate(&bundle(vec![relabelled(0, 1), test_set(1, 4, 6)]), 0)
            .unwrap();

        // Two candidate tasks: every sample is claimed by exactly one of them.
        let sum = as_zero.rows[0].task_prediction_acc + as_one.rows[0].task_prediction_acc;
        assert!((sum - 100.0).abs() < 1e-9);
        assert_eq!(as_zero.rows[0].class_prediction_acc, as_one.rows[0].class_prediction_acc);
        assert_eq!(as_zero.rows[1], as_one.rows[1]);
    }

    #[test]
    fn test_evaluate_emits_one_row_per_task() {
        let bundle = bundle(vec![test_set(0, 5, 6), test_set(1, 3, 6)]);
        let evaluator = Evaluator::new(EvaluationConfig::default());
        let table = evaluator.evaluate(&bundle, 0).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert!(table.failures.is_empty());
        for (task, row) in table.rows.iter().enumerate() {
            assert_eq!(row.task, task);
            assert!((0.0..=100.0).contains(&row.task_prediction_acc));
            assert!((0.0..=100.0).contains(&row.class_prediction_acc));
        }
    }

    #[test]
    fn test_parallel_evaluation_matches_serial() {
        let bundle = bundle(vec![test_set(0, 40, 6), test_set(1, 40, 6)]);
        let serial = Evaluator::new(EvaluationConfig {
            parallel: ParallelConfig::serial(),
            ..Default::default()
        });
        let parallel = Evaluator::new(EvaluationConfig {
            parallel: ParallelConfig {
                min_samples_for_parallel: 1,
                max_threads: Some(2),
            },
            ..Default::default()
        });
        assert_eq!(
            serial.evaluate(&bundle, 0).unwrap(),
            parallel.evaluate(&bundle, 0).unwrap()
        );
    }

    #[test]
    fn test_failed_task_aborts_by_default() {
        let bundle = bundle(vec![test_set(0, 4, 6), test_set(1, 4, 7)]);
        let evaluator = Evaluator::new(EvaluationConfig::default());
        let err = evaluator.evaluate(&bundle, 0).unwrap_err();
        assert!(matches!(err, HyperintError::TaskFailed { task: 1, .. }));
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn test_isolated_failure_keeps_going() {
        let bundle = bundle(vec![test_set(0, 4, 7), test_set(1, 4, 6)]);
        let evaluator = Evaluator::new(EvaluationConfig {
            isolate_failures: true,
            ..Default::default()
        });
        let table = evaluator.evaluate(&bundle, 0).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].task, 1);
        assert_eq!(table.failures.len(), 1);
        assert_eq!(table.failures[0].task, 0);
    }

    #[test]
    fn test_unknown_dataset_rejected_before_work() {
        let mut bundle = bundle(vec![test_set(0, 4, 6), test_set(1, 4, 6)]);
        bundle.hyperparameters.dataset = "TinyImageNet".to_string();
        let err = Evaluator::new(EvaluationConfig::default())
            .evaluate(&bundle, 0)
            .unwrap_err();
        assert!(matches!(err, HyperintError::UnsupportedDataset(_)));
    }

    #[test]
    fn test_too_many_tasks_rejected() {
        let mut bundle = bundle(vec![test_set(0, 4, 6), test_set(1, 4, 6)]);
        bundle.hyperparameters.number_of_tasks = 3;
        let err = Evaluator::new(EvaluationConfig::default())
            .evaluate(&bundle, 0)
            .unwrap_err();
        assert!(matches!(err, HyperintError::InvalidSpec(_)));
    }

    #[test]
    fn test_evaluate_and_save_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = bundle(vec![test_set(0, 4, 6), test_set(1, 4, 6)]);
        let evaluator = Evaluator::new(EvaluationConfig {
            write_json: true,
            ..Default::default()
        });
        let table = evaluator.evaluate_and_save(&bundle, 3, Some(dir.path())).unwrap();

        let csv = dir.path().join("entropy_statistics_3.csv");
        let text = fs::read_to_string(&csv).unwrap();
        assert_eq!(text, table.to_delimited(';'));
        assert_eq!(text.lines().count(), 3);
        assert!(dir.path().join("entropy_statistics_3.json").exists());
    }

    #[test]
    fn test_hyperparameters_json_defaults() {
        let hp: Hyperparameters = serde_json::from_str(
            r#"{"dataset": "PermutedMNIST", "target_network": "MLP", "number_of_tasks": 10}"#,
        )
        .unwrap();
        assert_eq!(hp.alpha, 0.0);
        assert!(!hp.full_interval);
        assert_eq!(hp.permuted_layout, PermutedLayout::Shared);
        assert_eq!(hp.translator().unwrap().setup(), 10);
    }
}
