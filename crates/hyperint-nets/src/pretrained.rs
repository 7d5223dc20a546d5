//! Frozen feature extractor followed by a generated linear head.

use crate::mlp::Mlp;
use crate::network::TargetNetwork;
use hyperint_core::{HyperintError, NetworkKind, Result};
use ndarray::{Array2, ArrayD};

/// A pretrained backbone whose weights are not generated by the hypernetwork.
pub trait FeatureExtractor: Send + Sync {
    /// Number of input features per flattened sample.
    fn input_size(&self) -> usize;

    /// Width of the feature vector handed to the head.
    fn feature_dim(&self) -> usize;

    fn extract(&self, input: &Array2<f32>) -> Result<Array2<f32>>;
}

/// Pass-through extractor for inputs that are already backbone features.
#[derive(Debug, Clone, Copy)]
pub struct IdentityExtractor {
    dim: usize,
}

impl IdentityExtractor {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl FeatureExtractor for IdentityExtractor {
    fn input_size(&self) -> usize {
        self.dim
    }

    fn feature_dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, input: &Array2<f32>) -> Result<Array2<f32>> {
        Ok(input.clone())
    }
}

/// Classifier whose only generated parameters are the linear head `[W, b]`.
pub struct PretrainedHead {
    extractor: Box<dyn FeatureExtractor>,
    head: Mlp,
}

impl PretrainedHead {
    pub fn new(extractor: Box<dyn FeatureExtractor>, num_classes: usize) -> Result<Self> {
        let head = Mlp::new(extractor.feature_dim(), Vec::new(), num_classes)?;
        Ok(Self { extractor, head })
    }
}

impl TargetNetwork for PretrainedHead {
    fn kind(&self) -> NetworkKind {
        NetworkKind::PretrainedResNet18
    }

    fn param_shapes(&self) -> &[Vec<usize>] {
        self.head.param_shapes()
    }

    fn num_outputs(&self) -> usize {
        self.head.num_outputs()
    }

    fn input_size(&self) -> usize {
        self.extractor.input_size()
    }

    fn forward(&self, input: &Array2<f32>, weights: &[ArrayD<f32>]) -> Result<Array2<f32>> {
        let features = self.extractor.extract(input)?;
        if features.ncols() != self.extractor.feature_dim() {
            return Err(HyperintError::shape_mismatch(
                "extracted features",
                vec![features.nrows(), self.extractor.feature_dim()],
                features.shape().to_vec(),
            ));
        }
        self.head.forward(&features, weights)
    }
}
