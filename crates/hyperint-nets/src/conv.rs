//! Plain convolutional classifier (AlexNet family).
//!
//! Samples arrive flattened in `(height, width, channels)` order and are
//! permuted to `(channels, height, width)` before the first convolution.
//! Each block is `conv2d -> optional max-pool -> ReLU`; the flattened feature
//! maps then go through fully connected layers, ReLU on all but the last.

use crate::network::TargetNetwork;
use crate::ops::{
    as_kernel, as_matrix, as_vector, conv2d, conv_output_size, flatten_batch, linear, max_pool2d,
    relu_inplace,
};
use hyperint_core::{HyperintError, NetworkKind, Result};
use ndarray::{Array2, Array4, ArrayD};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub kernel: usize,
    pub stride: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvBlock {
    pub out_channels: usize,
    pub kernel: usize,
    #[serde(default = "one")]
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
    #[serde(default)]
    pub pool: Option<PoolSpec>,
}

fn one() -> usize {
    1
}

impl ConvBlock {
    pub fn new(out_channels: usize, kernel: usize, stride: usize, padding: usize) -> Self {
        Self {
            out_channels,
            kernel,
            stride,
            padding,
            pool: None,
        }
    }

    pub fn with_pool(mut self, kernel: usize, stride: usize) -> Self {
        self.pool = Some(PoolSpec { kernel, stride });
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConvClassifier {
    in_shape: [usize; 3],
    blocks: Vec<ConvBlock>,
    num_classes: usize,
    flat_features: usize,
    param_shapes: Vec<Vec<usize>>,
}

impl ConvClassifier {
    /// Build a classifier for inputs of shape `[height, width, channels]`.
    ///
    /// Fails with `InvalidSpec` if any kernel or pooling window does not fit
    /// the feature map it is applied to.
    pub fn new(
        in_shape: [usize; 3],
        blocks: Vec<ConvBlock>,
        hidden_layers: Vec<usize>,
        num_classes: usize,
    ) -> Result<Self> {
        let [mut h, mut w, mut c] = in_shape;
        if h == 0 || w == 0 || c == 0 || num_classes == 0 {
            return Err(HyperintError::InvalidSpec(format!(
                "Invalid conv classifier dimensions: input {:?}, {} classes",
                in_shape, num_classes
            )));
        }

        let mut param_shapes = Vec::new();
        for (idx, block) in blocks.iter().enumerate() {
            if block.out_channels == 0 || block.kernel == 0 {
                return Err(HyperintError::InvalidSpec(format!(
                    "Conv block {} has zero channels or kernel size",
                    idx
                )));
            }
            param_shapes.push(vec![block.out_channels, c, block.kernel, block.kernel]);
            param_shapes.push(vec![block.out_channels]);

            let out = conv_output_size(h, block.kernel, block.stride, block.padding)
                .zip(conv_output_size(w, block.kernel, block.stride, block.padding));
            (h, w) = out.ok_or_else(|| {
                HyperintError::InvalidSpec(format!(
                    "Conv block {}: kernel {} does not fit {}x{} feature map",
                    idx, block.kernel, h, w
                ))
            })?;
            if let Some(pool) = block.pool {
                let out = conv_output_size(h, pool.kernel, pool.stride, 0)
                    .zip(conv_output_size(w, pool.kernel, pool.stride, 0));
                (h, w) = out.ok_or_else(|| {
                    HyperintError::InvalidSpec(format!(
                        "Conv block {}: pooling window {} does not fit {}x{} feature map",
                        idx, pool.kernel, h, w
                    ))
                })?;
            }
            c = block.out_channels;
        }

        let flat_features = c * h * w;
        let mut prev = flat_features;
        for &width in hidden_layers.iter().chain(std::iter::once(&num_classes)) {
            if width == 0 {
                return Err(HyperintError::InvalidSpec(
                    "Fully connected layer widths must be positive".to_string(),
                ));
            }
            param_shapes.push(vec![width, prev]);
            param_shapes.push(vec![width]);
            prev = width;
        }

        Ok(Self {
            in_shape,
            blocks,
            num_classes,
            flat_features,
            param_shapes,
        })
    }

    /// AlexNet: five convolutions and three fully connected layers.
    ///
    /// With a 227x227x3 input the flattened conv output is 256x6x6 = 9216,
    /// matching the classic `[4096, 9216]` first fully connected layer.
    ///
    /// 32x32 CIFAR images are too small for the stride-4 stem and three
    /// pools, so this preset rejects them with `InvalidSpec`. Give CIFAR
    /// models explicit `conv_blocks` in the target architecture (or upsample
    /// the inputs to 227x227) instead.
    pub fn alexnet(in_shape: [usize; 3], num_classes: usize) -> Result<Self> {
        let blocks = vec![
            ConvBlock::new(96, 11, 4, 0).with_pool(3, 2),
            ConvBlock::new(256, 5, 1, 2).with_pool(3, 2),
            ConvBlock::new(384, 3, 1, 1),
            ConvBlock::new(384, 3, 1, 1),
            ConvBlock::new(256, 3, 1, 1).with_pool(3, 2),
        ];
        Self::new(in_shape, blocks, vec![4096, 4096], num_classes)
    }

    /// Size of the flattened feature vector entering the first dense layer.
    pub fn flat_features(&self) -> usize {
        self.flat_features
    }

    fn to_feature_maps(&self, input: &Array2<f32>) -> Result<Array4<f32>> {
        let [h, w, c] = self.in_shape;
        let nhwc = Array4::from_shape_vec((input.nrows(), h, w, c), input.iter().copied().collect())
            .map_err(|e| HyperintError::InvalidSpec(format!("Failed to reshape input batch: {}", e)))?;
        Ok(nhwc.permuted_axes([0, 3, 1, 2]))
    }
}

impl TargetNetwork for ConvClassifier {
    fn kind(&self) -> NetworkKind {
        NetworkKind::AlexNet
    }

    fn param_shapes(&self) -> &[Vec<usize>] {
        &self.param_shapes
    }

    fn num_outputs(&self) -> usize {
        self.num_classes
    }

    fn input_size(&self) -> usize {
        self.in_shape.iter().product()
    }

    fn forward(&self, input: &Array2<f32>, weights: &[ArrayD<f32>]) -> Result<Array2<f32>> {
        let (conv_weights, dense_weights) = weights.split_at(2 * self.blocks.len());

        let mut h = self.to_feature_maps(input)?;
        for (block, pair) in self.blocks.iter().zip(conv_weights.chunks(2)) {
            let kernel = as_kernel(&pair[0], "conv kernel")?;
            let bias = as_vector(&pair[1], "conv bias")?;
            h = conv2d(h.view(), kernel, bias, block.stride, block.padding)?;
            if let Some(pool) = block.pool {
                h = max_pool2d(h.view(), pool.kernel, pool.stride)?;
            }
            relu_inplace(&mut h);
        }

        let mut x = flatten_batch(&h)?;
        let last = dense_weights.len() / 2 - 1;
        for (layer, pair) in dense_weights.chunks(2).enumerate() {
            let w = as_matrix(&pair[0], "dense weight")?;
            let b = as_vector(&pair[1], "dense bias")?;
            x = linear(x.view(), w, b)?;
            if layer < last {
                relu_inplace(&mut x);
            }
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::run;
    use ndarray::{Array, IxDyn};

    #[test]
    fn test_alexnet_param_shapes() {
        let net = ConvClassifier::alexnet([227, 227, 3], 10).unwrap();
        assert_eq!(net.flat_features(), 9216);
        assert_eq!(
            net.param_shapes(),
            &[
                vec![96, 3, 11, 11],
                vec![96],
                vec![256, 96, 5, 5],
                vec![256],
                vec![384, 256, 3, 3],
                vec![384],
                vec![384, 384, 3, 3],
                vec![384],
                vec![256, 384, 3, 3],
                vec![256],
                vec![4096, 9216],
                vec![4096],
                vec![4096, 4096],
                vec![4096],
                vec![10, 4096],
                vec![10],
            ]
        );
    }

    #[test]
    fn test_alexnet_rejects_small_images() {
        // 32x32 collapses to 2x2 after the second convolution; the 3x3 pool cannot fit.
        let err = ConvClassifier::alexnet([32, 32, 3], 10).unwrap_err();
        assert!(matches!(err, HyperintError::InvalidSpec(_)), "{err}");
    }

    #[test]
    fn test_small_conv_forward() {
        let blocks = vec![ConvBlock::new(2, 3, 1, 1).with_pool(2, 2)];
        let net = ConvClassifier::new([4, 4, 1], blocks, vec![], 3).unwrap();
        assert_eq!(net.flat_features(), 2 * 2 * 2);
        assert_eq!(net.input_size(), 16);

        let weights: Vec<ArrayD<f32>> = net
            .param_shapes()
            .iter()
            .map(|s| Array::from_elem(IxDyn(s), 0.1))
            .collect();
        let input = Array2::<f32>::ones((2, 16));
        let logits = run(&net, &weights, &input).unwrap();
        assert_eq!(logits.dim(), (2, 3));
        // Both samples are identical, so are their logits.
        assert_eq!(logits.row(0), logits.row(1));
        assert!(logits.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn test_channel_last_input_is_permuted() {
        // One 1x1 conv that reads only channel 1; a 1x1 image with channels [5, 7].
        let blocks = vec![ConvBlock::new(1, 1, 1, 0)];
        let net = ConvClassifier::new([1, 1, 2], blocks, vec![], 1).unwrap();
        let mut kernel = Array::zeros(IxDyn(&[1, 2, 1, 1]));
        kernel[[0, 1, 0, 0]] = 1.0;
        let weights = vec![
            kernel,
            Array::zeros(IxDyn(&[1])),
            Array::ones(IxDyn(&[1, 1])),
            Array::zeros(IxDyn(&[1])),
        ];
        let input = ndarray::arr2(&[[5.0, 7.0]]);
        let logits = run(&net, &weights, &input).unwrap();
        assert_eq!(logits[[0, 0]], 7.0);
    }
}
