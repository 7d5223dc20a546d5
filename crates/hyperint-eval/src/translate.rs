//! Mapping from (predicted task, task-relative class) to a global label.

use hyperint_core::{DatasetKind, HyperintError, Result};
use serde::{Deserialize, Serialize};

/// Number of CIFAR-100 classes.
pub const CIFAR100_CLASSES: usize = 100;

const MNIST_CLASSES: usize = 10;
const SPLIT_MNIST_CLASSES_PER_TASK: usize = 2;

/// How Permuted MNIST labels from different tasks relate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermutedLayout {
    /// Every task reuses digits 0-9.
    #[default]
    Shared,
    /// Task `t` owns labels `10 t .. 10 t + 9`.
    Disjoint,
}

/// Class grouping of a CIFAR-100 incremental setup: a base task followed
/// by equally sized increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecamGrouping {
    pub base_classes: usize,
    pub incremental_classes: usize,
}

impl FecamGrouping {
    /// Grouping for a setup given by its total number of tasks.
    pub fn for_setup(setup: usize) -> Result<Self> {
        let (base_classes, incremental_classes) = match setup {
            5 => (20, 20),
            6 => (50, 10),
            11 => (50, 5),
            21 => (40, 3),
            other => {
                return Err(HyperintError::InvalidSpec(format!(
                    "CIFAR-100 setup must be one of 5, 6, 11, 21, got {}",
                    other
                )))
            }
        };
        Ok(Self {
            base_classes,
            incremental_classes,
        })
    }

    pub fn classes_in_task(&self, task: usize) -> usize {
        if task == 0 {
            self.base_classes
        } else {
            self.incremental_classes
        }
    }

    /// Position of the task's first class in the class order.
    pub fn offset(&self, task: usize) -> usize {
        if task == 0 {
            0
        } else {
            self.base_classes + (task - 1) * self.incremental_classes
        }
    }
}

/// Translates task-relative predictions into dataset-global class labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTranslator {
    dataset: DatasetKind,
    setup: usize,
    class_order: Option<Vec<usize>>,
    permuted_layout: PermutedLayout,
}

impl ClassTranslator {
    /// Translator for `dataset` in an experiment of `setup` tasks.
    pub fn new(dataset: DatasetKind, setup: usize) -> Result<Self> {
        if setup == 0 {
            return Err(HyperintError::InvalidSpec(
                "Evaluation setup must have at least one task".to_string(),
            ));
        }
        match dataset {
            DatasetKind::Cifar100FeCam => {
                FecamGrouping::for_setup(setup)?;
            }
            DatasetKind::SplitMnist if setup * SPLIT_MNIST_CLASSES_PER_TASK > MNIST_CLASSES => {
                return Err(HyperintError::InvalidSpec(format!(
                    "Split MNIST has at most {} tasks, got {}",
                    MNIST_CLASSES / SPLIT_MNIST_CLASSES_PER_TASK,
                    setup
                )));
            }
            _ => {}
        }
        Ok(Self {
            dataset,
            setup,
            class_order: None,
            permuted_layout: PermutedLayout::default(),
        })
    }

    /// Parse the dataset name, failing with `UnsupportedDataset` for unknown names.
    pub fn from_name(dataset: &str, setup: usize) -> Result<Self> {
        Self::new(dataset.parse()?, setup)
    }

    /// Map ordered CIFAR-100 class positions to real labels.
    ///
    /// `order` must be a permutation of `0..100`.
    pub fn with_class_order(mut self, order: Vec<usize>) -> Result<Self> {
        if self.dataset != DatasetKind::Cifar100FeCam {
            return Err(HyperintError::InvalidSpec(format!(
                "A class order table only applies to CIFAR-100, not {}",
                self.dataset
            )));
        }
        let mut seen = [false; CIFAR100_CLASSES];
        for &label in &order {
            match seen.get_mut(label) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(HyperintError::InvalidSpec(format!(
                        "Class order is not a permutation of 0..{}: bad entry {}",
                        CIFAR100_CLASSES, label
                    )))
                }
            }
        }
        if order.len() != CIFAR100_CLASSES {
            return Err(HyperintError::InvalidSpec(format!(
                "Class order must list {} classes, got {}",
                CIFAR100_CLASSES,
                order.len()
            )));
        }
        self.class_order = Some(order);
        Ok(self)
    }

    pub fn with_permuted_layout(mut self, layout: PermutedLayout) -> Self {
        self.permuted_layout = layout;
        self
    }

    pub fn dataset(&self) -> DatasetKind {
        self.dataset
    }

    pub fn setup(&self) -> usize {
        self.setup
    }

    /// Number of classes the task's head distinguishes.
    pub fn classes_in_task(&self, task: usize) -> Result<usize> {
        self.check_task(task)?;
        Ok(match self.dataset {
            DatasetKind::PermutedMnist => MNIST_CLASSES,
            DatasetKind::SplitMnist => SPLIT_MNIST_CLASSES_PER_TASK,
            DatasetKind::Cifar100FeCam => FecamGrouping::for_setup(self.setup)?.classes_in_task(task),
        })
    }

    /// Global label of relative class `relative` predicted under `task`.
    pub fn translate(&self, relative: usize, task: usize) -> Result<usize> {
        let classes = self.classes_in_task(task)?;
        if relative >= classes {
            return Err(HyperintError::InvalidSpec(format!(
                "Relative class {} is outside task {}'s {} classes",
                relative, task, classes
            )));
        }
        Ok(match self.dataset {
            DatasetKind::PermutedMnist => match self.permuted_layout {
                PermutedLayout::Shared => relative,
                PermutedLayout::Disjoint => task * MNIST_CLASSES + relative,
            },
            DatasetKind::SplitMnist => task * SPLIT_MNIST_CLASSES_PER_TASK + relative,
            DatasetKind::Cifar100FeCam => {
                let position = FecamGrouping::for_setup(self.setup)?.offset(task) + relative;
                match &self.class_order {
                    Some(order) => order[position],
                    None => position,
                }
            }
        })
    }

    fn check_task(&self, task: usize) -> Result<()> {
        if task >= self.setup {
            return Err(HyperintError::InvalidSpec(format!(
                "Task {} is outside a {}-task setup",
                task, self.setup
            )));
        }
        Ok(())
    }
}
