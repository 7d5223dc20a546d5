//! Hypernetworks: task-conditioned generators of target network weights.
//!
//! [`IntervalHmlp`] maps a learned per-task embedding through an MLP to the
//! flattened target weights. In interval mode the embedding is widened to
//! the box `[e - alpha, e + alpha]` and pushed through the MLP with interval
//! bound propagation (IBP):
//!
//! - Linear: center `c' = W c + b`, radius `r' = |W| r`
//! - ReLU: monotone, so `[relu(c - r), relu(c + r)]`
//!
//! The resulting output box gives the lower and upper target weights; the
//! middle weights are the plain forward pass of the embedding, which always
//! lies inside the box.

use hyperint_core::{check_param_shapes, num_weights, GeneratedWeights, HyperintError, Result, WeightSet};
use ndarray::{Array, Array1, ArrayD, ArrayView1, ArrayView2, Ix1, Ix2, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A network that produces target network weights for a task.
pub trait Hypernetwork: Send + Sync {
    /// Shapes of the hypernetwork's own parameters.
    fn param_shapes(&self) -> &[Vec<usize>];

    /// Shapes of the target weights it generates.
    fn target_shapes(&self) -> &[Vec<usize>];

    /// Number of tasks it can generate weights for.
    fn num_tasks(&self) -> usize;

    /// Generate target weights for `task`.
    ///
    /// `alpha` scales the interval around the task embedding; it is only
    /// meaningful when `full_interval` is set. Without `full_interval` the
    /// result is a point estimate.
    fn generate(
        &self,
        weights: &[ArrayD<f32>],
        task: usize,
        alpha: f32,
        full_interval: bool,
    ) -> Result<GeneratedWeights>;
}

/// Architecture of an [`IntervalHmlp`], as stored in experiment bundles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HmlpConfig {
    pub num_tasks: usize,
    pub embedding_dim: usize,
    #[serde(default)]
    pub hidden_layers: Vec<usize>,
}

/// MLP hypernetwork with per-task embeddings and interval generation.
///
/// Parameters: `[embeddings (num_tasks, embedding_dim), W0, b0, ..., W_out, b_out]`.
#[derive(Debug, Clone)]
pub struct IntervalHmlp {
    config: HmlpConfig,
    target_shapes: Vec<Vec<usize>>,
    param_shapes: Vec<Vec<usize>>,
}

impl IntervalHmlp {
    pub fn new(config: HmlpConfig, target_shapes: Vec<Vec<usize>>) -> Result<Self> {
        if config.num_tasks == 0 || config.embedding_dim == 0 || config.hidden_layers.contains(&0) {
            return Err(HyperintError::InvalidSpec(format!(
                "Invalid hypernetwork architecture: {:?}",
                config
            )));
        }
        let n_out = num_weights(&target_shapes);
        if n_out == 0 {
            return Err(HyperintError::InvalidSpec(
                "Hypernetwork has no target weights to generate".to_string(),
            ));
        }

        let mut param_shapes = vec![vec![config.num_tasks, config.embedding_dim]];
        let mut prev = config.embedding_dim;
        for &width in config.hidden_layers.iter().chain(std::iter::once(&n_out)) {
            param_shapes.push(vec![width, prev]);
            param_shapes.push(vec![width]);
            prev = width;
        }

        Ok(Self {
            config,
            target_shapes,
            param_shapes,
        })
    }

    pub fn config(&self) -> &HmlpConfig {
        &self.config
    }

    /// Random parameters (uniform, fan-in scaled) for synthetic experiments.
    pub fn init_weights(&self, seed: u64) -> WeightSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut bound = 1.0f32;
        self.param_shapes
            .iter()
            .enumerate()
            .map(|(idx, shape)| {
                // Biases reuse the bound of the weight matrix before them.
                if idx > 0 && shape.len() == 2 {
                    bound = 1.0 / (shape[1] as f32).sqrt();
                }
                Array::from_shape_fn(IxDyn(shape), |_| rng.gen_range(-bound..=bound))
            })
            .collect()
    }

    fn layers<'a>(&self, weights: &'a [ArrayD<f32>]) -> Result<Vec<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)>> {
        weights[1..]
            .chunks(2)
            .map(|pair| {
                let w = pair[0]
                    .view()
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| HyperintError::InvalidSpec(e.to_string()))?;
                let b = pair[1]
                    .view()
                    .into_dimensionality::<Ix1>()
                    .map_err(|e| HyperintError::InvalidSpec(e.to_string()))?;
                Ok((w, b))
            })
            .collect()
    }

    fn forward_point(layers: &[(ArrayView2<f32>, ArrayView1<f32>)], embedding: ArrayView1<f32>) -> Array1<f32> {
        let last = layers.len() - 1;
        let mut h = embedding.to_owned();
        for (idx, (w, b)) in layers.iter().enumerate() {
            h = w.dot(&h) + b;
            if idx < last {
                h.mapv_inplace(|v| v.max(0.0));
            }
        }
        h
    }

    fn forward_interval(
        layers: &[(ArrayView2<f32>, ArrayView1<f32>)],
        embedding: ArrayView1<f32>,
        alpha: f32,
    ) -> (Array1<f32>, Array1<f32>) {
        let last = layers.len() - 1;
        let mut center = embedding.to_owned();
        let mut radius = Array1::from_elem(center.len(), alpha);
        for (idx, (w, b)) in layers.iter().enumerate() {
            center = w.dot(&center) + b;
            radius = w.mapv(f32::abs).dot(&radius);
            if idx < last {
                let lower = (&center - &radius).mapv(|v| v.max(0.0));
                let upper = (&center + &radius).mapv(|v| v.max(0.0));
                center = (&upper + &lower) * 0.5;
                radius = (&upper - &lower) * 0.5;
            }
        }
        (&center - &radius, &center + &radius)
    }

    /// Cut a flat output vector into tensors of the target shapes.
    fn split_flat(&self, flat: &Array1<f32>) -> Result<WeightSet> {
        let expected = num_weights(&self.target_shapes);
        if flat.len() != expected {
            return Err(HyperintError::shape_mismatch(
                "generated weight vector",
                vec![expected],
                vec![flat.len()],
            ));
        }
        let flat = flat.as_slice().ok_or_else(|| {
            HyperintError::InvalidSpec("Generated weights are not contiguous".to_string())
        })?;
        let mut offset = 0;
        let mut out = Vec::with_capacity(self.target_shapes.len());
        for shape in &self.target_shapes {
            let len: usize = shape.iter().product();
            let tensor = Array::from_shape_vec(IxDyn(shape), flat[offset..offset + len].to_vec())
                .map_err(|e| HyperintError::InvalidSpec(e.to_string()))?;
            out.push(tensor);
            offset += len;
        }
        Ok(out)
    }
}

impl Hypernetwork for IntervalHmlp {
    fn param_shapes(&self) -> &[Vec<usize>] {
        &self.param_shapes
    }

    fn target_shapes(&self) -> &[Vec<usize>] {
        &self.target_shapes
    }

    fn num_tasks(&self) -> usize {
        self.config.num_tasks
    }

    fn generate(
        &self,
        weights: &[ArrayD<f32>],
        task: usize,
        alpha: f32,
        full_interval: bool,
    ) -> Result<GeneratedWeights> {
        check_param_shapes(&self.param_shapes, weights)?;
        if task >= self.config.num_tasks {
            return Err(HyperintError::InvalidSpec(format!(
                "Task {} out of range: hypernetwork knows {} tasks",
                task, self.config.num_tasks
            )));
        }
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(HyperintError::InvalidSpec(format!(
                "Interval scale alpha must be finite and non-negative, got {}",
                alpha
            )));
        }
        debug!(
            "Generating target weights for task {} (alpha {}, full_interval {})",
            task, alpha, full_interval
        );

        let embeddings = weights[0]
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| HyperintError::InvalidSpec(e.to_string()))?;
        let embedding = embeddings.row(task);
        let layers = self.layers(weights)?;

        let middle = self.split_flat(&Self::forward_point(&layers, embedding))?;
        if !full_interval {
            return Ok(GeneratedWeights::Point(middle));
        }
        let (lower, upper) = Self::forward_interval(&layers, embedding, alpha);
        Ok(GeneratedWeights::Interval {
            lower: self.split_flat(&lower)?,
            middle,
            upper: self.split_flat(&upper)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperint_core::IntervalSlot;
    use ndarray::{arr1, arr2};
    use proptest::prelude::*;

    /// Tolerance for floating-point rounding in containment checks.
    const FP_TOLERANCE: f32 = 1e-4;

    fn tiny() -> IntervalHmlp {
        let config = HmlpConfig {
            num_tasks: 2,
            embedding_dim: 2,
            hidden_layers: vec![3],
        };
        IntervalHmlp::new(config, vec![vec![2, 2], vec![2]]).unwrap()
    }

    #[test]
    fn test_param_shapes() {
        let hnet = tiny();
        assert_eq!(
            hnet.param_shapes(),
            &[vec![2, 2], vec![3, 2], vec![3], vec![6, 3], vec![6]]
        );
        assert_eq!(hnet.num_tasks(), 2);
    }

    #[test]
    fn test_point_generation_matches_hand_forward() {
        let config = HmlpConfig {
            num_tasks: 2,
            embedding_dim: 1,
            hidden_layers: vec![],
        };
        let hnet = IntervalHmlp::new(config, vec![vec![2]]).unwrap();
        let weights = vec![
            arr2(&[[1.0], [2.0]]).into_dyn(),
            arr2(&[[1.0], [-1.0]]).into_dyn(),
            arr1(&[0.5, 0.0]).into_dyn(),
        ];
        let generated = hnet.generate(&weights, 1, 0.3, false).unwrap();
        assert!(!generated.is_interval());
        assert_eq!(generated.middle()[0], arr1(&[2.5, -2.0]).into_dyn());
    }

    #[test]
    fn test_interval_generation_linear_is_exact() {
        let config = HmlpConfig {
            num_tasks: 1,
            embedding_dim: 2,
            hidden_layers: vec![],
        };
        let hnet = IntervalHmlp::new(config, vec![vec![1]]).unwrap();
        let weights = vec![
            arr2(&[[1.0, 1.0]]).into_dyn(),
            arr2(&[[2.0, -1.0]]).into_dyn(),
            arr1(&[0.0]).into_dyn(),
        ];
        let generated = hnet.generate(&weights, 0, 0.5, true).unwrap();
        // center = 2 - 1 = 1, radius = (2 + 1) * 0.5 = 1.5
        assert_eq!(generated.slot(IntervalSlot::Lower)[0][[0]], -0.5);
        assert_eq!(generated.slot(IntervalSlot::Middle)[0][[0]], 1.0);
        assert_eq!(generated.slot(IntervalSlot::Upper)[0][[0]], 2.5);
    }

    #[test]
    fn test_zero_alpha_collapses_interval() {
        let hnet = tiny();
        let weights = hnet.init_weights(7);
        let generated = hnet.generate(&weights, 0, 0.0, true).unwrap();
        for ((l, m), u) in generated
            .slot(IntervalSlot::Lower)
            .iter()
            .zip(generated.middle())
            .zip(generated.slot(IntervalSlot::Upper))
        {
            for ((a, b), c) in l.iter().zip(m.iter()).zip(u.iter()) {
                assert!((a - b).abs() < FP_TOLERANCE && (c - b).abs() < FP_TOLERANCE);
            }
        }
    }

    #[test]
    fn test_generated_shapes_follow_target() {
        let hnet = tiny();
        let weights = hnet.init_weights(1);
        let generated = hnet.generate(&weights, 1, 0.1, true).unwrap();
        for slot in IntervalSlot::ALL {
            check_param_shapes(hnet.target_shapes(), generated.slot(slot)).unwrap();
        }
    }

    #[test]
    fn test_rejects_bad_task_and_alpha() {
        let hnet = tiny();
        let weights = hnet.init_weights(1);
        assert!(matches!(
            hnet.generate(&weights, 2, 0.1, true),
            Err(HyperintError::InvalidSpec(_))
        ));
        assert!(matches!(
            hnet.generate(&weights, 0, -0.1, true),
            Err(HyperintError::InvalidSpec(_))
        ));
        assert!(matches!(
            hnet.generate(&weights, 0, f32::NAN, true),
            Err(HyperintError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_hypernetwork_weights() {
        let hnet = tiny();
        let mut weights = hnet.init_weights(1);
        weights[2] = Array::zeros(IxDyn(&[4]));
        assert!(hnet.generate(&weights, 0, 0.1, false).unwrap_err().is_shape_mismatch());
        weights.pop();
        assert!(hnet.generate(&weights, 0, 0.1, false).unwrap_err().is_shape_mismatch());
    }

    #[test]
    fn test_init_weights_is_deterministic() {
        let hnet = tiny();
        assert_eq!(hnet.init_weights(42), hnet.init_weights(42));
        assert_ne!(hnet.init_weights(42), hnet.init_weights(43));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// IBP soundness: middle weights lie inside [lower, upper], and the box
        /// only grows with alpha.
        #[test]
        fn soundness_middle_inside_interval(seed in 0u64..1000, alpha in 0.0f32..2.0, task in 0usize..2) {
            let hnet = tiny();
            let weights = hnet.init_weights(seed);
            let generated = hnet.generate(&weights, task, alpha, true).unwrap();
            let wider = hnet.generate(&weights, task, alpha + 0.5, true).unwrap();
            let lower = generated.slot(IntervalSlot::Lower);
            let middle = generated.middle();
            let upper = generated.slot(IntervalSlot::Upper);
            for p in 0..middle.len() {
                for ((l, m), u) in lower[p].iter().zip(middle[p].iter()).zip(upper[p].iter()) {
                    prop_assert!(*l - FP_TOLERANCE <= *m && *m <= *u + FP_TOLERANCE,
                        "middle {} outside [{}, {}]", m, l, u);
                }
                let wl = &wider.slot(IntervalSlot::Lower)[p];
                let wu = &wider.slot(IntervalSlot::Upper)[p];
                for ((l, u), (a, b)) in lower[p].iter().zip(upper[p].iter()).zip(wl.iter().zip(wu.iter())) {
                    prop_assert!(*a <= *l + FP_TOLERANCE && *u <= *b + FP_TOLERANCE);
                }
            }
        }
    }
}
