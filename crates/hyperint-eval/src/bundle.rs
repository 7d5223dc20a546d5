//! JSON experiment bundles.
//!
//! A bundle file carries one trained model: hyperparameters, the target
//! architecture, the hypernetwork architecture and weights, and the per-task
//! test sets. Files ending in `.gz` are decompressed on the fly.
//!
//! ```json
//! {
//!   "hyperparameters": {"dataset": "SplitMNIST", "target_network": "MLP", ...},
//!   "target_architecture": {"in_shape": [784], "num_classes": 2, "hidden_layers": [400, 400]},
//!   "hypernetwork": {"num_tasks": 5, "embedding_dim": 24, "hidden_layers": [100, 100]},
//!   "hypernetwork_weights": [{"shape": [5, 24], "data": [...]}, ...],
//!   "test_sets": [{"x": {"shape": [n, 784], "data": [...]}, "y": [...]}, ...]
//! }
//! ```

use crate::data::{InMemoryTestSets, TestSet};
use crate::driver::{ExperimentBundle, Hyperparameters};
use hyperint_core::io::read_json_maybe_gzip;
use hyperint_core::{HyperintError, Result, WeightSet};
use hyperint_nets::{build_target_network, HmlpConfig, Hypernetwork, IntervalHmlp, TargetArchitecture};
use ndarray::{Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Dense tensor in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    pub fn from_array(array: &ArrayD<f32>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    pub fn to_array(&self) -> Result<ArrayD<f32>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone()).map_err(|e| {
            HyperintError::ModelLoad(format!(
                "Tensor of shape {:?} cannot hold {} values: {}",
                self.shape,
                self.data.len(),
                e
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSetRecord {
    pub x: TensorRecord,
    pub y: Vec<usize>,
    /// Defaults to the index of the test set for every sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_labels: Option<Vec<usize>>,
}

impl TestSetRecord {
    pub fn from_test_set(set: &TestSet) -> Self {
        Self {
            x: TensorRecord::from_array(&set.x.clone().into_dyn()),
            y: set.y.clone(),
            task_labels: Some(set.task_labels.clone()),
        }
    }

    fn to_test_set(&self, task: usize) -> Result<TestSet> {
        let x: Array2<f32> = self.x.to_array()?.into_dimensionality().map_err(|_| {
            HyperintError::ModelLoad(format!(
                "Test inputs of task {} must be 2-D, got shape {:?}",
                task, self.x.shape
            ))
        })?;
        let task_labels = self
            .task_labels
            .clone()
            .unwrap_or_else(|| vec![task; self.y.len()]);
        let set = TestSet {
            x,
            y: self.y.clone(),
            task_labels,
        };
        set.validate()?;
        Ok(set)
    }
}

/// On-disk form of an [`ExperimentBundle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleFile {
    pub hyperparameters: Hyperparameters,
    pub target_architecture: TargetArchitecture,
    pub hypernetwork: HmlpConfig,
    pub hypernetwork_weights: Vec<TensorRecord>,
    pub test_sets: Vec<TestSetRecord>,
}

impl BundleFile {
    pub fn new(
        hyperparameters: Hyperparameters,
        target_architecture: TargetArchitecture,
        hypernetwork: HmlpConfig,
        hypernetwork_weights: &[ArrayD<f32>],
        test_sets: &[TestSet],
    ) -> Self {
        Self {
            hyperparameters,
            target_architecture,
            hypernetwork,
            hypernetwork_weights: hypernetwork_weights.iter().map(TensorRecord::from_array).collect(),
            test_sets: test_sets.iter().map(TestSetRecord::from_test_set).collect(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        read_json_maybe_gzip(path)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).map_err(std::io::Error::from)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Build the networks and test sets.
    ///
    /// The hypernetwork weights are checked against the architecture here,
    /// so a corrupt bundle fails before any evaluation starts.
    pub fn into_bundle(self) -> Result<ExperimentBundle> {
        let hp = &self.hyperparameters;
        let target = build_target_network(&hp.target_network, &self.target_architecture)?;
        let hnet = IntervalHmlp::new(self.hypernetwork, target.param_shapes().to_vec())?;

        let weights: WeightSet = self
            .hypernetwork_weights
            .iter()
            .map(TensorRecord::to_array)
            .collect::<Result<_>>()?;
        hyperint_core::check_param_shapes(hnet.param_shapes(), &weights)?;

        if self.test_sets.len() < hp.number_of_tasks {
            return Err(HyperintError::ModelLoad(format!(
                "Bundle has {} test sets for {} tasks",
                self.test_sets.len(),
                hp.number_of_tasks
            )));
        }
        let sets = self
            .test_sets
            .iter()
            .enumerate()
            .map(|(task, record)| record.to_test_set(task))
            .collect::<Result<Vec<_>>>()?;

        Ok(ExperimentBundle {
            hypernetwork: Box::new(hnet),
            hypernetwork_weights: weights,
            target_network: target,
            hyperparameters: self.hyperparameters,
            test_sets: Box::new(InMemoryTestSets::new(sets)?),
        })
    }
}

/// Read and build the bundle at `path`.
pub fn load_bundle(path: &Path) -> Result<ExperimentBundle> {
    let file = BundleFile::read(path)?;
    info!(
        path = %path.display(),
        dataset = %file.hyperparameters.dataset,
        target_network = %file.hyperparameters.target_network,
        num_tasks = file.hyperparameters.number_of_tasks,
        "Loading experiment bundle"
    );
    file.into_bundle()
}
