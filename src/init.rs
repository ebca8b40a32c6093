//! Parameter initialization utilities.
//!
//! These free functions implement the three initializers the global model
//! policy needs: constant fill, Kaiming fan-out normal with ReLU gain, and
//! a plain normal distribution.

use ndarray::{Array, Dimension};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;

/// Fills the tensor with a constant value.
pub fn constant<D: Dimension>(tensor: &mut Array<f32, D>, value: f32) {
    tensor.fill(value);
}

/// Fills the tensor with samples from N(mean, std^2).
pub fn normal<D: Dimension>(tensor: &mut Array<f32, D>, mean: f32, std: f32) {
    let distribution =
        Normal::new(mean, std).expect("normal init requires a finite, positive std");
    *tensor = Array::random(tensor.raw_dim(), distribution);
}

/// Kaiming normal initialization in fan-out mode with ReLU gain:
/// `std = sqrt(2 / fan_out)`.
///
/// For a convolution, `fan_out = out_channels * kernel_volume`.
pub fn kaiming_normal<D: Dimension>(tensor: &mut Array<f32, D>, fan_out: usize) {
    assert!(fan_out > 0, "kaiming init requires fan_out > 0");
    let std = (2.0 / fan_out as f32).sqrt();
    normal(tensor, 0.0, std);
}
