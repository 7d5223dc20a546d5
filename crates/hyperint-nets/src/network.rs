//! Target networks whose weights are supplied per call.

use crate::conv::{ConvBlock, ConvClassifier};
use crate::mlp::Mlp;
use crate::pretrained::{IdentityExtractor, PretrainedHead};
use hyperint_core::{check_param_shapes, HyperintError, NetworkKind, Result};
use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A fixed-architecture classifier with externally supplied weights.
///
/// Implementations hold no trainable state: `forward` is a pure function of
/// the input batch and the weight collection.
pub trait TargetNetwork: Send + Sync {
    fn kind(&self) -> NetworkKind;

    /// Declared parameter shapes, in the order weights must be supplied.
    fn param_shapes(&self) -> &[Vec<usize>];

    /// Head size (number of output logits).
    fn num_outputs(&self) -> usize;

    /// Number of input features per flattened sample.
    fn input_size(&self) -> usize;

    /// Forward pass on a batch of flattened samples, `(batch, input_size)`.
    ///
    /// Callers should go through [`run`], which validates the weights first.
    fn forward(&self, input: &Array2<f32>, weights: &[ArrayD<f32>]) -> Result<Array2<f32>>;
}

/// Run `network` on `input` under `weights`.
///
/// Weights are checked shape-by-shape against the declared parameter shapes
/// before anything is computed.
pub fn run(network: &dyn TargetNetwork, weights: &[ArrayD<f32>], input: &Array2<f32>) -> Result<Array2<f32>> {
    check_param_shapes(network.param_shapes(), weights)?;
    if input.ncols() != network.input_size() {
        return Err(HyperintError::shape_mismatch(
            "input batch",
            vec![input.nrows(), network.input_size()],
            input.shape().to_vec(),
        ));
    }
    trace!(
        "Running {} on batch of {} samples",
        network.kind(),
        input.nrows()
    );
    let logits = network.forward(input, weights)?;
    debug_assert_eq!(logits.ncols(), network.num_outputs());
    Ok(logits)
}

/// Architecture description used to build a target network from a bundle.
///
/// Only the fields relevant to the chosen network kind are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetArchitecture {
    /// Input sample shape. `[features]` for MLPs, `[height, width, channels]` for conv nets.
    pub in_shape: Vec<usize>,
    /// Number of output logits.
    pub num_classes: usize,
    /// Hidden fully connected layer widths.
    #[serde(default)]
    pub hidden_layers: Vec<usize>,
    /// Convolutional blocks (conv nets only).
    #[serde(default)]
    pub conv_blocks: Vec<ConvBlock>,
    /// Feature dimension of the frozen extractor (pretrained heads only).
    #[serde(default = "default_feature_dim")]
    pub feature_dim: usize,
}

fn default_feature_dim() -> usize {
    512
}

/// Build the target network named by `network_type`.
pub fn build_target_network(network_type: &str, arch: &TargetArchitecture) -> Result<Box<dyn TargetNetwork>> {
    let kind: NetworkKind = network_type.parse()?;
    let network: Box<dyn TargetNetwork> = match kind {
        NetworkKind::Mlp => {
            let n_in = match arch.in_shape.as_slice() {
                [] => {
                    return Err(HyperintError::InvalidSpec(
                        "MLP input shape must not be empty".to_string(),
                    ))
                }
                dims => dims.iter().product(),
            };
            Box::new(Mlp::new(n_in, arch.hidden_layers.clone(), arch.num_classes)?)
        }
        NetworkKind::AlexNet => {
            let in_shape = match arch.in_shape.as_slice() {
                &[h, w, c] => [h, w, c],
                other => {
                    return Err(HyperintError::InvalidSpec(format!(
                        "AlexNet expects an input shape [height, width, channels], got {:?}",
                        other
                    )))
                }
            };
            if arch.conv_blocks.is_empty() {
                Box::new(ConvClassifier::alexnet(in_shape, arch.num_classes)?)
            } else {
                Box::new(ConvClassifier::new(
                    in_shape,
                    arch.conv_blocks.clone(),
                    arch.hidden_layers.clone(),
                    arch.num_classes,
                )?)
            }
        }
        NetworkKind::PretrainedResNet18 => Box::new(PretrainedHead::new(
            Box::new(IdentityExtractor::new(arch.feature_dim)),
            arch.num_classes,
        )?),
    };
    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    fn mlp_arch() -> TargetArchitecture {
        TargetArchitecture {
            in_shape: vec![4],
            num_classes: 2,
            hidden_layers: vec![3],
            conv_blocks: Vec::new(),
            feature_dim: 512,
        }
    }

    fn weights_for(shapes: &[Vec<usize>], value: f32) -> Vec<ArrayD<f32>> {
        shapes
            .iter()
            .map(|s| Array::from_elem(IxDyn(s), value))
            .collect()
    }

    #[test]
    fn test_build_unknown_network_type() {
        let err = build_target_network("ResNet", &mlp_arch()).err().unwrap();
        assert!(matches!(err, HyperintError::UnsupportedNetworkType(ref s) if s == "ResNet"));
    }

    #[test]
    fn test_run_checks_every_shape() {
        let net = build_target_network("MLP", &mlp_arch()).unwrap();
        let input = Array2::<f32>::ones((5, 4));
        let good = weights_for(net.param_shapes(), 0.1);
        let logits = run(net.as_ref(), &good, &input).unwrap();
        assert_eq!(logits.dim(), (5, 2));

        // Swap in a wrongly shaped tensor at every position in turn.
        for idx in 0..good.len() {
            let mut bad = good.clone();
            let mut shape = bad[idx].shape().to_vec();
            shape[0] += 1;
            bad[idx] = Array::zeros(IxDyn(&shape));
            let err = run(net.as_ref(), &bad, &input).unwrap_err();
            assert!(err.is_shape_mismatch(), "param {idx}: {err}");
        }
    }

    #[test]
    fn test_run_rejects_wrong_input_width() {
        let net = build_target_network("MLP", &mlp_arch()).unwrap();
        let weights = weights_for(net.param_shapes(), 0.1);
        let input = Array2::<f32>::ones((5, 7));
        assert!(run(net.as_ref(), &weights, &input).unwrap_err().is_shape_mismatch());
    }

    #[test]
    fn test_build_pretrained_head() {
        let arch = TargetArchitecture {
            in_shape: vec![224, 224, 3],
            num_classes: 40,
            hidden_layers: Vec::new(),
            conv_blocks: Vec::new(),
            feature_dim: 512,
        };
        let net = build_target_network("PretrainedResNet18", &arch).unwrap();
        assert_eq!(net.param_shapes(), &[vec![40, 512], vec![40]]);
        assert_eq!(net.kind(), NetworkKind::PretrainedResNet18);
    }

    #[test]
    fn test_build_alexnet_requires_image_shape() {
        let err = build_target_network("AlexNet", &mlp_arch()).err().unwrap();
        assert!(matches!(err, HyperintError::InvalidSpec(_)));
    }

    #[test]
    fn test_build_cifar_conv_from_explicit_blocks() {
        // CIFAR-sized inputs need their own blocks; the AlexNet preset rejects 32x32.
        let mut arch = TargetArchitecture {
            in_shape: vec![32, 32, 3],
            num_classes: 10,
            hidden_layers: vec![64],
            conv_blocks: Vec::new(),
            feature_dim: 512,
        };
        assert!(build_target_network("AlexNet", &arch).is_err());

        arch.conv_blocks = vec![
            ConvBlock::new(16, 3, 1, 1).with_pool(2, 2),
            ConvBlock::new(32, 3, 1, 1).with_pool(2, 2),
        ];
        let net = build_target_network("AlexNet", &arch).unwrap();
        assert_eq!(net.input_size(), 32 * 32 * 3);
        assert_eq!(net.num_outputs(), 10);
        assert_eq!(net.param_shapes()[4], vec![64, 32 * 8 * 8]);

        let weights = weights_for(net.param_shapes(), 0.01);
        let logits = run(net.as_ref(), &weights, &Array2::ones((2, 32 * 32 * 3))).unwrap();
        assert_eq!(logits.dim(), (2, 10));
    }
}
