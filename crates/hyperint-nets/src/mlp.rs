//! Fully connected classifier with ReLU hidden layers.

use crate::network::TargetNetwork;
use crate::ops::{as_matrix, as_vector, linear, relu_inplace};
use hyperint_core::{HyperintError, NetworkKind, Result};
use ndarray::{Array2, ArrayD};

/// MLP whose parameters are `[W0, b0, W1, b1, ..., W_out, b_out]`,
/// weights shaped `(out, in)`.
#[derive(Debug, Clone)]
pub struct Mlp {
    n_in: usize,
    n_out: usize,
    param_shapes: Vec<Vec<usize>>,
}

impl Mlp {
    pub fn new(n_in: usize, hidden_layers: Vec<usize>, n_out: usize) -> Result<Self> {
        if n_in == 0 || n_out == 0 || hidden_layers.contains(&0) {
            return Err(HyperintError::InvalidSpec(format!(
                "MLP layer widths must be positive: in={}, hidden={:?}, out={}",
                n_in, hidden_layers, n_out
            )));
        }
        let mut param_shapes = Vec::with_capacity(2 * (hidden_layers.len() + 1));
        let mut prev = n_in;
        for &width in hidden_layers.iter().chain(std::iter::once(&n_out)) {
            param_shapes.push(vec![width, prev]);
            param_shapes.push(vec![width]);
            prev = width;
        }
        Ok(Self {
            n_in,
            n_out,
            param_shapes,
        })
    }

    /// Number of linear layers (hidden + output).
    pub fn num_layers(&self) -> usize {
        self.param_shapes.len() / 2
    }
}

impl TargetNetwork for Mlp {
    fn kind(&self) -> NetworkKind {
        NetworkKind::Mlp
    }

    fn param_shapes(&self) -> &[Vec<usize>] {
        &self.param_shapes
    }

    fn num_outputs(&self) -> usize {
        self.n_out
    }

    fn input_size(&self) -> usize {
        self.n_in
    }

    fn forward(&self, input: &Array2<f32>, weights: &[ArrayD<f32>]) -> Result<Array2<f32>> {
        let last = self.num_layers() - 1;
        let mut h = input.clone();
        for (layer, pair) in weights.chunks(2).enumerate() {
            let w = as_matrix(&pair[0], "MLP weight")?;
            let b = as_vector(&pair[1], "MLP bias")?;
            h = linear(h.view(), w, b)?;
            if layer < last {
                relu_inplace(&mut h);
            }
        }
        Ok(h)
    }
}
