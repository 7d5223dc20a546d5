//! Per-task test sets.

use hyperint_core::{HyperintError, Result};
use ndarray::Array2;

/// Test data of one continual-learning task.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSet {
    /// Flattened samples, `(num_samples, input_size)`.
    pub x: Array2<f32>,
    /// Global ground-truth class labels.
    pub y: Vec<usize>,
    /// Ground-truth task of each sample.
    pub task_labels: Vec<usize>,
}

impl TestSet {
    /// Build a test set whose samples all belong to `task`.
    pub fn for_task(x: Array2<f32>, y: Vec<usize>, task: usize) -> Result<Self> {
        let task_labels = vec![task; y.len()];
        let set = Self { x, y, task_labels };
        set.validate()?;
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    /// Labels and task labels must cover every sample.
    pub fn validate(&self) -> Result<()> {
        let n = self.x.nrows();
        if self.y.len() != n || self.task_labels.len() != n {
            return Err(HyperintError::InvalidSpec(format!(
                "Test set has {} samples but {} labels and {} task labels",
                n,
                self.y.len(),
                self.task_labels.len()
            )));
        }
        Ok(())
    }
}

/// Source of per-task test sets.
pub trait TestSetProvider: Send + Sync {
    fn num_tasks(&self) -> usize;

    fn extract_test_set(&self, task: usize) -> Result<TestSet>;
}

/// Test sets held in memory, indexed by task.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTestSets {
    sets: Vec<TestSet>,
}

impl InMemoryTestSets {
    pub fn new(sets: Vec<TestSet>) -> Result<Self> {
        for (task, set) in sets.iter().enumerate() {
            set.validate().map_err(|e| e.in_task(task))?;
        }
        Ok(Self { sets })
    }
}

impl TestSetProvider for InMemoryTestSets {
    fn num_tasks(&self) -> usize {
        self.sets.len()
    }

    fn extract_test_set(&self, task: usize) -> Result<TestSet> {
        self.sets.get(task).cloned().ok_or_else(|| {
            HyperintError::InvalidSpec(format!(
                "No test set for task {} ({} available)",
                task,
                self.sets.len()
            ))
        })
    }
}
