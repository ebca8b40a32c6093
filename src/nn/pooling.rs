//! Module implementing spatiotemporal pooling layers.

use crate::nn::module::{as_5d, LayerError, Module};
use ndarray::{s, Array5, ArrayD, ArrayViewD};

fn assert_valid_stride(stride: (usize, usize, usize)) {
    let (st, sh, sw) = stride;
    assert!(
        st >= 1 && sh >= 1 && sw >= 1,
        "pooling stride must be >= 1"
    );
}

fn pooled_extent(input: usize, kernel: usize, stride: usize, padding: usize) -> Result<usize, LayerError> {
    let padded = input + 2 * padding;
    if padded < kernel {
        return Err(LayerError::Shape(format!(
            "pooling window {} larger than padded input {}",
            kernel, padded
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

/// Max Pooling 3D layer.
///
/// Applies max pooling to an input tensor of shape [N, C, T, H, W].
/// Padding positions never win the max, so windows are simply clipped to
/// the valid input range.
pub struct MaxPool3d {
    /// Window size (kT, kH, kW).
    pub kernel_size: (usize, usize, usize),
    /// Stride (sT, sH, sW).
    pub stride: (usize, usize, usize),
    /// Padding (pT, pH, pW).
    pub padding: (usize, usize, usize),
}

impl MaxPool3d {
    /// Creates MaxPool3d layer.
    ///
    /// # Panics
    /// Panics if any stride component is zero.
    pub fn new(kernel_size: (usize, usize, usize), stride: (usize, usize, usize)) -> Self {
        assert_valid_stride(stride);
        Self {
            kernel_size,
            stride,
            padding: (0, 0, 0),
        }
    }

    /// Sets padding.
    pub fn with_padding(mut self, padding: (usize, usize, usize)) -> Self {
        self.padding = padding;
        self
    }
}

impl Module for MaxPool3d {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let x = as_5d(input)?;
        let (n, c, t_in, h_in, w_in) = x.dim();
        let (kt, kh, kw) = self.kernel_size;
        let (st, sh, sw) = self.stride;
        let (pt, ph, pw) = self.padding;

        let t_out = pooled_extent(t_in, kt, st, pt)?;
        let h_out = pooled_extent(h_in, kh, sh, ph)?;
        let w_out = pooled_extent(w_in, kw, sw, pw)?;

        let mut output = Array5::<f32>::zeros((n, c, t_out, h_out, w_out));
        for b in 0..n {
            for ch in 0..c {
                for ot in 0..t_out {
                    let (t0, t1) = clipped_window(ot, st, kt, pt, t_in);
                    for oh in 0..h_out {
                        let (h0, h1) = clipped_window(oh, sh, kh, ph, h_in);
                        for ow in 0..w_out {
                            let (w0, w1) = clipped_window(ow, sw, kw, pw, w_in);
                            let window = x.slice(s![b, ch, t0..t1, h0..h1, w0..w1]);
                            let max_val = window
                                .iter()
                                .fold(f32::NEG_INFINITY, |max, &val| max.max(val));
                            output[[b, ch, ot, oh, ow]] = max_val;
                        }
                    }
                }
            }
        }

        Ok(output.into_dyn())
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![] // Pooling layers have no trainable parameters
    }
}

/// Clips a pooling window `[o * stride - padding, o * stride - padding + kernel)`
/// to the valid `[0, input)` range.
fn clipped_window(
    out_idx: usize,
    stride: usize,
    kernel: usize,
    padding: usize,
    input: usize,
) -> (usize, usize) {
    let start = out_idx as isize * stride as isize - padding as isize;
    let lo = start.max(0) as usize;
    let hi = ((start + kernel as isize).max(0) as usize).min(input);
    (lo, hi)
}

/// Average Pooling 3D layer.
///
/// Applies average pooling to an input tensor of shape [N, C, T, H, W].
/// Used by the classification head with a fixed window and stride 1.
pub struct AvgPool3d {
    /// Window size (kT, kH, kW).
    pub kernel_size: (usize, usize, usize),
    /// Stride (sT, sH, sW).
    pub stride: (usize, usize, usize),
}

impl AvgPool3d {
    /// Creates AvgPool3d layer.
    ///
    /// # Panics
    /// Panics if any stride component is zero.
    pub fn new(kernel_size: (usize, usize, usize), stride: (usize, usize, usize)) -> Self {
        assert_valid_stride(stride);
        Self { kernel_size, stride }
    }
}

impl Module for AvgPool3d {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let x = as_5d(input)?;
        let (n, c, t_in, h_in, w_in) = x.dim();
        let (kt, kh, kw) = self.kernel_size;
        let (st, sh, sw) = self.stride;

        let t_out = pooled_extent(t_in, kt, st, 0)?;
        let h_out = pooled_extent(h_in, kh, sh, 0)?;
        let w_out = pooled_extent(w_in, kw, sw, 0)?;
        let volume = (kt * kh * kw) as f32;

        let mut output = Array5::<f32>::zeros((n, c, t_out, h_out, w_out));
        for b in 0..n {
            for ch in 0..c {
                for ot in 0..t_out {
                    let t0 = ot * st;
                    for oh in 0..h_out {
                        let h0 = oh * sh;
                        for ow in 0..w_out {
                            let w0 = ow * sw;
                            let window = x.slice(s![b, ch, t0..t0 + kt, h0..h0 + kh, w0..w0 + kw]);
                            output[[b, ch, ot, oh, ow]] = window.sum() / volume;
                        }
                    }
                }
            }
        }

        Ok(output.into_dyn())
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![]
    }
}

/// Adaptive Average Pooling 3D.
///
/// Automatically computes pooling windows to achieve the target output
/// size regardless of the input size. The classification head uses it with
/// output size (1, 1, 1) when no fixed pool size is configured.
pub struct AdaptiveAvgPool3d {
    /// Target output size (T_out, H_out, W_out).
    pub output_size: (usize, usize, usize),
}

impl AdaptiveAvgPool3d {
    /// Creates AdaptiveAvgPool3d layer.
    pub fn new(output_size: (usize, usize, usize)) -> Self {
        Self { output_size }
    }

    /// Creates global spatiotemporal pooling - output size (1, 1, 1).
    pub fn global() -> Self {
        Self {
            output_size: (1, 1, 1),
        }
    }
}

/// Window bounds for adaptive pooling: `[floor(i*in/out), ceil((i+1)*in/out))`.
fn adaptive_window(out_idx: usize, input: usize, output: usize) -> (usize, usize) {
    let lo = out_idx * input / output;
    let hi = ((out_idx + 1) * input + output - 1) / output;
    (lo, hi)
}

impl Module for AdaptiveAvgPool3d {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let x = as_5d(input)?;
        let (n, c, t_in, h_in, w_in) = x.dim();
        let (t_out, h_out, w_out) = self.output_size;
        if t_out == 0 || h_out == 0 || w_out == 0 {
            return Err(LayerError::Shape(
                "AdaptiveAvgPool3d: output size components must be non-zero".to_string(),
            ));
        }
        if t_in < t_out || h_in < h_out || w_in < w_out {
            return Err(LayerError::Shape(format!(
                "AdaptiveAvgPool3d: input ({}, {}, {}) smaller than output ({}, {}, {})",
                t_in, h_in, w_in, t_out, h_out, w_out
            )));
        }

        let mut output = Array5::<f32>::zeros((n, c, t_out, h_out, w_out));
        for b in 0..n {
            for ch in 0..c {
                for ot in 0..t_out {
                    let (t0, t1) = adaptive_window(ot, t_in, t_out);
                    for oh in 0..h_out {
                        let (h0, h1) = adaptive_window(oh, h_in, h_out);
                        for ow in 0..w_out {
                            let (w0, w1) = adaptive_window(ow, w_in, w_out);
                            let window = x.slice(s![b, ch, t0..t1, h0..h1, w0..w1]);
                            let count = ((t1 - t0) * (h1 - h0) * (w1 - w0)) as f32;
                            output[[b, ch, ot, oh, ow]] = window.sum() / count;
                        }
                    }
                }
            }
        }

        Ok(output.into_dyn())
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![]
    }
}
