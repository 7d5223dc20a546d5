//! Batched forward operations on concrete (non-interval) tensors.
//!
//! Layouts follow the PyTorch conventions the generated weights come from:
//! linear weights are `(out, in)`, convolution kernels `(out, in, kh, kw)`,
//! feature maps `(batch, channels, height, width)`.

use hyperint_core::{HyperintError, Result};
use ndarray::{Array2, Array4, ArrayD, ArrayView1, ArrayView2, ArrayView4, Ix1, Ix2, Ix4};

/// View a generated weight tensor as a matrix.
pub(crate) fn as_matrix<'a>(w: &'a ArrayD<f32>, what: &str) -> Result<ArrayView2<'a, f32>> {
    w.view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| HyperintError::InvalidSpec(format!("{} is not a matrix: {}", what, e)))
}

pub(crate) fn as_vector<'a>(w: &'a ArrayD<f32>, what: &str) -> Result<ArrayView1<'a, f32>> {
    w.view()
        .into_dimensionality::<Ix1>()
        .map_err(|e| HyperintError::InvalidSpec(format!("{} is not a vector: {}", what, e)))
}

pub(crate) fn as_kernel<'a>(w: &'a ArrayD<f32>, what: &str) -> Result<ArrayView4<'a, f32>> {
    w.view()
        .into_dimensionality::<Ix4>()
        .map_err(|e| HyperintError::InvalidSpec(format!("{} is not a 4D kernel: {}", what, e)))
}

/// `y = x W^T + b` for a batch `x` of shape `(batch, in)`.
pub fn linear(x: ArrayView2<f32>, weight: ArrayView2<f32>, bias: ArrayView1<f32>) -> Result<Array2<f32>> {
    if x.ncols() != weight.ncols() {
        return Err(HyperintError::shape_mismatch(
            "linear input features",
            vec![x.nrows(), weight.ncols()],
            x.shape().to_vec(),
        ));
    }
    if bias.len() != weight.nrows() {
        return Err(HyperintError::shape_mismatch(
            "linear bias",
            vec![weight.nrows()],
            vec![bias.len()],
        ));
    }
    let mut y = x.dot(&weight.t());
    y += &bias;
    Ok(y)
}

pub fn relu_inplace<D: ndarray::Dimension>(x: &mut ndarray::Array<f32, D>) {
    x.mapv_inplace(|v| v.max(0.0));
}

/// Output spatial size of a convolution or pooling window.
pub fn conv_output_size(input: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = input + 2 * padding;
    if stride == 0 || padded < kernel {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

/// 2D cross-correlation with zero padding (PyTorch `conv2d` semantics).
pub fn conv2d(
    x: ArrayView4<f32>,
    weight: ArrayView4<f32>,
    bias: ArrayView1<f32>,
    stride: usize,
    padding: usize,
) -> Result<Array4<f32>> {
    let (batch, in_c, in_h, in_w) = x.dim();
    let (out_c, w_in_c, kh, kw) = weight.dim();
    if in_c != w_in_c {
        return Err(HyperintError::shape_mismatch(
            "conv2d input channels",
            vec![w_in_c],
            vec![in_c],
        ));
    }
    if bias.len() != out_c {
        return Err(HyperintError::shape_mismatch("conv2d bias", vec![out_c], vec![bias.len()]));
    }
    let out_h = conv_output_size(in_h, kh, stride, padding);
    let out_w = conv_output_size(in_w, kw, stride, padding);
    let (out_h, out_w) = match (out_h, out_w) {
        (Some(h), Some(w)) => (h, w),
        _ => {
            return Err(HyperintError::InvalidSpec(format!(
                "conv2d kernel {}x{} (stride {}, padding {}) does not fit input {}x{}",
                kh, kw, stride, padding, in_h, in_w
            )))
        }
    };

    let mut out = Array4::<f32>::zeros((batch, out_c, out_h, out_w));
    for n in 0..batch {
        for o in 0..out_c {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut acc = bias[o];
                    for c in 0..in_c {
                        for i in 0..kh {
                            let ih = (oh * stride + i) as isize - padding as isize;
                            if ih < 0 || ih >= in_h as isize {
                                continue;
                            }
                            for j in 0..kw {
                                let iw = (ow * stride + j) as isize - padding as isize;
                                if iw < 0 || iw >= in_w as isize {
                                    continue;
                                }
                                acc += x[[n, c, ih as usize, iw as usize]] * weight[[o, c, i, j]];
                            }
                        }
                    }
                    out[[n, o, oh, ow]] = acc;
                }
            }
        }
    }
    Ok(out)
}

/// Max pooling without padding.
pub fn max_pool2d(x: ArrayView4<f32>, kernel: usize, stride: usize) -> Result<Array4<f32>> {
    let (batch, channels, in_h, in_w) = x.dim();
    let out_h = conv_output_size(in_h, kernel, stride, 0);
    let out_w = conv_output_size(in_w, kernel, stride, 0);
    let (out_h, out_w) = match (out_h, out_w) {
        (Some(h), Some(w)) => (h, w),
        _ => {
            return Err(HyperintError::InvalidSpec(format!(
                "max_pool2d window {} (stride {}) does not fit input {}x{}",
                kernel, stride, in_h, in_w
            )))
        }
    };

    let mut out = Array4::<f32>::from_elem((batch, channels, out_h, out_w), f32::NEG_INFINITY);
    for n in 0..batch {
        for c in 0..channels {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut best = f32::NEG_INFINITY;
                    for i in 0..kernel {
                        for j in 0..kernel {
                            best = best.max(x[[n, c, oh * stride + i, ow * stride + j]]);
                        }
                    }
                    out[[n, c, oh, ow]] = best;
                }
            }
        }
    }
    Ok(out)
}

/// Flatten `(batch, ...)` to `(batch, features)` in row-major order.
pub fn flatten_batch(x: &Array4<f32>) -> Result<Array2<f32>> {
    let batch = x.shape()[0];
    let features = x.len() / batch.max(1);
    Array2::from_shape_vec((batch, features), x.iter().copied().collect())
        .map_err(|e| HyperintError::InvalidSpec(format!("Failed to flatten feature maps: {}", e)))
}
