//! Core types for task-agnostic evaluation of interval hypernetwork classifiers.
//!
//! A hypernetwork generates one weight collection per learned task for a
//! shared target network. At test time the task is unknown, so the target
//! network is run under every task's weights and the resulting logits are
//! collected into a [`LogitsTensor`] of shape
//! `(num_tasks, num_samples, 3, num_outputs)`, where axis 2 holds the
//! lower, middle and upper interval members (see [`IntervalSlot`]).

pub mod error;
pub mod io;
pub mod kinds;

pub use error::{HyperintError, Result};
pub use kinds::{DatasetKind, NetworkKind};

use ndarray::{s, Array2, Array3, Array4, ArrayD, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// Position of a member inside a lower/middle/upper triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalSlot {
    Lower,
    Middle,
    Upper,
}

impl IntervalSlot {
    /// Slots in storage order along the interval axis.
    pub const ALL: [IntervalSlot; 3] = [IntervalSlot::Lower, IntervalSlot::Middle, IntervalSlot::Upper];

    /// Index along the interval axis of a [`LogitsTensor`].
    #[inline]
    pub fn index(self) -> usize {
        match self {
            IntervalSlot::Lower => 0,
            IntervalSlot::Middle => 1,
            IntervalSlot::Upper => 2,
        }
    }
}

/// Size of the interval axis.
pub const INTERVAL_ARITY: usize = 3;

/// Declared parameter shapes of a network, in parameter order.
pub type ParamShapes = Vec<Vec<usize>>;

/// An ordered weight collection, one tensor per declared parameter.
pub type WeightSet = Vec<ArrayD<f32>>;

/// Check a weight collection against declared parameter shapes.
///
/// The number of tensors must match, then every tensor must match its
/// declared shape exactly. Nothing is broadcast or truncated.
pub fn check_param_shapes(declared: &[Vec<usize>], weights: &[ArrayD<f32>]) -> Result<()> {
    if declared.len() != weights.len() {
        return Err(HyperintError::shape_mismatch(
            "parameter count",
            vec![declared.len()],
            vec![weights.len()],
        ));
    }
    for (idx, (expected, weight)) in declared.iter().zip(weights).enumerate() {
        if expected.as_slice() != weight.shape() {
            return Err(HyperintError::shape_mismatch(
                format!("parameter {}", idx),
                expected.clone(),
                weight.shape().to_vec(),
            ));
        }
    }
    Ok(())
}

/// Total number of scalars described by a list of parameter shapes.
pub fn num_weights(shapes: &[Vec<usize>]) -> usize {
    shapes.iter().map(|s| s.iter().product::<usize>()).sum()
}

/// Target network weights produced by a hypernetwork for one task.
#[derive(Debug, Clone)]
pub enum GeneratedWeights {
    /// A single point estimate.
    Point(WeightSet),
    /// Interval weights: element-wise lower and upper bounds around a middle estimate.
    Interval {
        lower: WeightSet,
        middle: WeightSet,
        upper: WeightSet,
    },
}

impl GeneratedWeights {
    /// Weights for one interval slot. A point estimate serves every slot.
    pub fn slot(&self, slot: IntervalSlot) -> &WeightSet {
        match self {
            GeneratedWeights::Point(weights) => weights,
            GeneratedWeights::Interval { lower, middle, upper } => match slot {
                IntervalSlot::Lower => lower,
                IntervalSlot::Middle => middle,
                IntervalSlot::Upper => upper,
            },
        }
    }

    pub fn is_interval(&self) -> bool {
        matches!(self, GeneratedWeights::Interval { .. })
    }

    pub fn middle(&self) -> &WeightSet {
        self.slot(IntervalSlot::Middle)
    }
}

/// Logits of every candidate task for every sample of one evaluation batch.
///
/// Shape `(num_tasks, num_samples, 3, num_outputs)`; immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LogitsTensor {
    data: Array4<f32>,
}

impl LogitsTensor {
    /// Wrap a raw array, checking that the interval axis has three slots.
    pub fn from_array(data: Array4<f32>) -> Result<Self> {
        let shape = data.shape();
        if shape[2] != INTERVAL_ARITY {
            let mut expected = shape.to_vec();
            expected[2] = INTERVAL_ARITY;
            return Err(HyperintError::shape_mismatch(
                "logits interval axis",
                expected,
                shape.to_vec(),
            ));
        }
        Ok(Self { data })
    }

    /// Stack per-candidate blocks of shape `(num_samples, 3, num_outputs)`.
    pub fn from_candidate_blocks(blocks: &[Array3<f32>]) -> Result<Self> {
        let first = blocks.first().ok_or_else(|| {
            HyperintError::InvalidSpec("Cannot build logits tensor from zero tasks".to_string())
        })?;
        for block in blocks {
            if block.shape() != first.shape() {
                return Err(HyperintError::shape_mismatch(
                    "candidate logits block",
                    first.shape().to_vec(),
                    block.shape().to_vec(),
                ));
            }
        }
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| HyperintError::InvalidSpec(format!("Failed to stack logits: {}", e)))?;
        Self::from_array(data)
    }

    pub fn num_tasks(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn num_samples(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn num_outputs(&self) -> usize {
        self.data.shape()[3]
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    /// All candidates' interval logits for one sample: `(num_tasks, 3, num_outputs)`.
    pub fn sample(&self, sample: usize) -> ArrayView3<'_, f32> {
        self.data.slice(s![.., sample, .., ..])
    }

    /// One candidate's interval logits for one sample: `(3, num_outputs)`.
    pub fn candidate(&self, task: usize, sample: usize) -> ArrayView2<'_, f32> {
        self.data.slice(s![task, sample, .., ..])
    }
}

/// Stack three `(num_samples, num_outputs)` logits batches into `(num_samples, 3, num_outputs)`.
pub fn stack_interval_logits(lower: &Array2<f32>, middle: &Array2<f32>, upper: &Array2<f32>) -> Result<Array3<f32>> {
    for (what, other) in [("lower logits", lower), ("upper logits", upper)] {
        if other.shape() != middle.shape() {
            return Err(HyperintError::shape_mismatch(
                what,
                middle.shape().to_vec(),
                other.shape().to_vec(),
            ));
        }
    }
    ndarray::stack(Axis(1), &[lower.view(), middle.view(), upper.view()])
        .map_err(|e| HyperintError::InvalidSpec(format!("Failed to stack interval logits: {}", e)))
}
