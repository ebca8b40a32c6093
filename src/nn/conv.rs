//! Module implementing 3D convolution for video tensors.

use crate::init;
use crate::nn::module::{as_5d, LayerError, Module};
use ndarray::{s, Array1, Array2, Array5, ArrayD, ArrayViewD, Axis, CowArray, Ix5};

/// Configuration for Conv3d layer.
#[derive(Debug, Clone)]
pub struct Conv3dConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels (filters).
    pub out_channels: usize,
    /// Convolution kernel size (kT, kH, kW).
    pub kernel_size: (usize, usize, usize),
    /// Convolution stride (sT, sH, sW).
    pub stride: (usize, usize, usize),
    /// Padding (pT, pH, pW).
    pub padding: (usize, usize, usize),
    /// Number of groups for grouped convolution (ResNeXt cardinality).
    pub groups: usize,
    /// Use bias. Off by default: every convolution in this crate is
    /// followed by a normalization layer carrying its own shift.
    pub bias: bool,
}

impl Conv3dConfig {
    /// Creates Conv3d configuration.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize, usize),
    ) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: (1, 1, 1),
            padding: (0, 0, 0),
            groups: 1,
            bias: false,
        }
    }

    /// Sets convolution stride.
    pub fn with_stride(mut self, stride: (usize, usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    /// Sets padding.
    pub fn with_padding(mut self, padding: (usize, usize, usize)) -> Self {
        self.padding = padding;
        self
    }

    /// Sets number of groups.
    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    /// Enables/disables bias.
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }
}

/// 3D Convolutional layer.
///
/// Applies 3D convolution to an input tensor of shape [N, C_in, T, H, W].
/// The output tensor has shape [N, C_out, T_out, H_out, W_out].
///
/// The forward pass uses an im2col + matmul formulation, lowered one
/// temporal output slice at a time to bound the size of the column matrix.
///
/// # Example
///
/// ```rust,ignore
/// use resnext3d::nn::{Conv3d, Conv3dConfig, Module};
///
/// let conv = Conv3d::from_config(
///     Conv3dConfig::new(3, 64, (3, 7, 7))
///         .with_stride((1, 2, 2))
///         .with_padding((1, 3, 3)),
/// );
/// let output = conv.forward(&input)?;
/// ```
pub struct Conv3d {
    /// Weight tensor [C_out, C_in/groups, kT, kH, kW].
    pub weight: Array5<f32>,
    /// Optional bias [C_out].
    pub bias: Option<Array1<f32>>,
    /// Layer configuration.
    pub config: Conv3dConfig,
}

impl Conv3d {
    /// Creates a new Conv3d layer with basic parameters.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize, usize),
    ) -> Self {
        Self::from_config(Conv3dConfig::new(in_channels, out_channels, kernel_size))
    }

    /// Creates Conv3d layer from configuration. Parameters are allocated
    /// zero-filled; the enclosing model applies its initialization policy
    /// once the whole graph is constructed.
    ///
    /// # Panics
    /// Panics if `groups` does not divide both channel counts, or any
    /// stride component is zero.
    pub fn from_config(config: Conv3dConfig) -> Self {
        assert!(config.groups >= 1, "Conv3d requires groups >= 1");
        assert!(
            config.in_channels % config.groups == 0
                && config.out_channels % config.groups == 0,
            "Conv3d channels ({} -> {}) must be divisible by groups ({})",
            config.in_channels,
            config.out_channels,
            config.groups
        );
        let (st, sh, sw) = config.stride;
        assert!(st >= 1 && sh >= 1 && sw >= 1, "Conv3d stride must be >= 1");

        let (kt, kh, kw) = config.kernel_size;
        let weight = Array5::zeros((
            config.out_channels,
            config.in_channels / config.groups,
            kt,
            kh,
            kw,
        ));
        let bias = if config.bias {
            Some(Array1::zeros(config.out_channels))
        } else {
            None
        };

        Self { weight, bias, config }
    }

    /// Fan-out of this convolution: `C_out * kT * kH * kW`.
    pub fn fan_out(&self) -> usize {
        let (kt, kh, kw) = self.config.kernel_size;
        self.config.out_channels * kt * kh * kw
    }

    /// Kaiming fan-out normal initialization with ReLU gain; bias (if any)
    /// is zeroed.
    pub fn init_kaiming_normal(&mut self) {
        let fan_out = self.fan_out();
        init::kaiming_normal(&mut self.weight, fan_out);
        if let Some(bias) = &mut self.bias {
            init::constant(bias, 0.0);
        }
    }

    /// Zero initialization, used for final-transform convolutions under the
    /// zero-init-residual policy.
    pub fn init_zero(&mut self) {
        init::constant(&mut self.weight, 0.0);
        if let Some(bias) = &mut self.bias {
            init::constant(bias, 0.0);
        }
    }
}

impl Module for Conv3d {
    /// Applies grouped 3D convolution to the input.
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let x = as_5d(input)?;
        let (n, c_in, t_in, h_in, w_in) = x.dim();
        let cfg = &self.config;
        if c_in != cfg.in_channels {
            return Err(LayerError::Shape(format!(
                "Conv3d: input has {} channels, layer expects {}",
                c_in, cfg.in_channels
            )));
        }

        let (kt, kh, kw) = cfg.kernel_size;
        let (st, sh, sw) = cfg.stride;
        let (pt, ph, pw) = cfg.padding;

        let (t_pad, h_pad, w_pad) = (t_in + 2 * pt, h_in + 2 * ph, w_in + 2 * pw);
        if t_pad < kt || h_pad < kh || w_pad < kw {
            return Err(LayerError::Shape(format!(
                "Conv3d: padded input ({}, {}, {}) is smaller than kernel ({}, {}, {})",
                t_pad, h_pad, w_pad, kt, kh, kw
            )));
        }
        let t_out = (t_pad - kt) / st + 1;
        let h_out = (h_pad - kh) / sh + 1;
        let w_out = (w_pad - kw) / sw + 1;

        let padded: CowArray<'_, f32, Ix5> = if pt == 0 && ph == 0 && pw == 0 {
            CowArray::from(x)
        } else {
            let mut buf = Array5::<f32>::zeros((n, c_in, t_pad, h_pad, w_pad));
            buf.slice_mut(s![.., .., pt..pt + t_in, ph..ph + h_in, pw..pw + w_in])
                .assign(&x);
            CowArray::from(buf)
        };

        let groups = cfg.groups;
        let c_in_g = c_in / groups;
        let c_out_g = cfg.out_channels / groups;
        let patch = c_in_g * kt * kh * kw;

        let mut output = Array5::<f32>::zeros((n, cfg.out_channels, t_out, h_out, w_out));
        let mut cols = Array2::<f32>::zeros((patch, h_out * w_out));

        for g in 0..groups {
            let w_g = self
                .weight
                .slice(s![g * c_out_g..(g + 1) * c_out_g, .., .., .., ..]);
            let w_mat = w_g
                .to_shape((c_out_g, patch))
                .map_err(|e| LayerError::Shape(format!("Conv3d weight: {}", e)))?;

            for b in 0..n {
                for ot in 0..t_out {
                    let t0 = ot * st;
                    let mut row = 0;
                    for c in 0..c_in_g {
                        let cc = g * c_in_g + c;
                        for dt in 0..kt {
                            let src_t = t0 + dt;
                            for dh in 0..kh {
                                for dw in 0..kw {
                                    let mut col = 0;
                                    for oh in 0..h_out {
                                        let src_h = oh * sh + dh;
                                        for ow in 0..w_out {
                                            cols[[row, col]] =
                                                padded[[b, cc, src_t, src_h, ow * sw + dw]];
                                            col += 1;
                                        }
                                    }
                                    row += 1;
                                }
                            }
                        }
                    }

                    let out_mat = w_mat.dot(&cols);
                    let out_block = out_mat
                        .to_shape((c_out_g, h_out, w_out))
                        .map_err(|e| LayerError::Shape(format!("Conv3d output: {}", e)))?;
                    output
                        .slice_mut(s![b, g * c_out_g..(g + 1) * c_out_g, ot, .., ..])
                        .assign(&out_block);
                }
            }
        }

        if let Some(bias) = &self.bias {
            for (c, mut lane) in output.axis_iter_mut(Axis(1)).enumerate() {
                lane += bias[c];
            }
        }

        Ok(output.into_dyn())
    }

    /// Returns trainable parameters of the layer.
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = vec![self.weight.view().into_dyn()];
        if let Some(bias) = &self.bias {
            params.push(bias.view().into_dyn());
        }
        params
    }
}
