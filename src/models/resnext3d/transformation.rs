//! Skip and residual transformation strategies for residual blocks.
//!
//! A residual block combines one skip transformation and one residual
//! transformation. Both come in a post-activated and a pre-activated
//! variant; the closed set of strategies is expressed as tagged unions
//! ([`ResidualTransformation`], [`SkipTransformation`]) selected via
//! [`ResidualTransformationType`] / [`SkipTransformationType`].

use crate::nn::module::{LayerError, Module};
use crate::nn::{BatchNorm3d, Conv3d, Conv3dConfig, Identity, ReLU};
use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};

/// Selector for the residual-path strategy of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidualTransformationType {
    PostactivatedBottleneck,
    PreactivatedBottleneck,
}

/// Selector for the skip-path strategy of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipTransformationType {
    PostactivatedShortcut,
    PreactivatedShortcut,
}

/// Hyperparameters of one bottleneck residual block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleneckConfig {
    /// Input channel count.
    pub dim_in: usize,
    /// Output channel count.
    pub dim_out: usize,
    /// Inner (bottleneck) channel count.
    pub dim_inner: usize,
    /// Temporal kernel size T for the Tx1x1 / Tx3x3 convolution pair.
    pub temporal_kernel_size: usize,
    /// If true, the temporal extent T is applied in the first (1x1-style)
    /// convolution; otherwise in the second (3x3) convolution.
    pub temporal_conv_1x1: bool,
    /// Temporal stride of the block.
    pub temporal_stride: usize,
    /// Spatial stride of the block.
    pub spatial_stride: usize,
    /// Number of groups of the 3x3 convolution (ResNeXt cardinality).
    pub num_groups: usize,
    /// MSRA style puts the spatial stride on the 1x1 convolution;
    /// otherwise it goes on the 3x3 convolution (TH/C2 style).
    pub spatial_stride_1x1: bool,
    /// Batch normalization epsilon.
    pub bn_eps: f32,
    /// Batch normalization momentum.
    pub bn_mmt: f32,
    /// Skips the leading norm+activation pair of pre-activated variants.
    /// Used for the first block of the first stage, where the stem's own
    /// activation already serves that role.
    pub disable_pre_activation: bool,
}

impl BottleneckConfig {
    pub fn new(dim_in: usize, dim_out: usize, dim_inner: usize) -> Self {
        Self {
            dim_in,
            dim_out,
            dim_inner,
            temporal_kernel_size: 3,
            temporal_conv_1x1: true,
            temporal_stride: 1,
            spatial_stride: 1,
            num_groups: 1,
            spatial_stride_1x1: false,
            bn_eps: crate::nn::batchnorm::DEFAULT_EPS,
            bn_mmt: crate::nn::batchnorm::DEFAULT_MOMENTUM,
            disable_pre_activation: false,
        }
    }

    pub fn with_temporal_kernel_size(mut self, temporal_kernel_size: usize) -> Self {
        self.temporal_kernel_size = temporal_kernel_size;
        self
    }

    pub fn with_temporal_conv_1x1(mut self, temporal_conv_1x1: bool) -> Self {
        self.temporal_conv_1x1 = temporal_conv_1x1;
        self
    }

    pub fn with_strides(mut self, temporal_stride: usize, spatial_stride: usize) -> Self {
        self.temporal_stride = temporal_stride;
        self.spatial_stride = spatial_stride;
        self
    }

    pub fn with_num_groups(mut self, num_groups: usize) -> Self {
        self.num_groups = num_groups;
        self
    }

    pub fn with_disable_pre_activation(mut self, disable: bool) -> Self {
        self.disable_pre_activation = disable;
        self
    }

    /// Whether a skip projection is required: channel count or one of the
    /// strides changes across the block.
    pub fn needs_projection(&self) -> bool {
        self.dim_in != self.dim_out || self.spatial_stride != 1 || self.temporal_stride != 1
    }

    /// Splits the temporal kernel size between the two first convolutions:
    /// `(T, 1)` when `temporal_conv_1x1`, `(1, T)` otherwise.
    fn temporal_kernel_split(&self) -> (usize, usize) {
        if self.temporal_conv_1x1 {
            (self.temporal_kernel_size, 1)
        } else {
            (1, self.temporal_kernel_size)
        }
    }

    /// Splits the spatial stride: MSRA puts stride on the 1x1 conv, TH/C2
    /// puts it on the 3x3 conv.
    fn spatial_stride_split(&self) -> (usize, usize) {
        if self.spatial_stride_1x1 {
            (self.spatial_stride, 1)
        } else {
            (1, self.spatial_stride)
        }
    }
}

/// Post-activated bottleneck transformation: Tx1x1, 1x3x3, 1x1x1 where T is
/// the size of the temporal kernel; each convolution is followed by
/// normalization, and the first two also by ReLU. The trailing activation
/// belongs to the enclosing block, after the skip sum.
pub struct PostactivatedBottleneckTransformation {
    pub branch2a: Conv3d,
    pub branch2a_bn: BatchNorm3d,
    pub branch2b: Conv3d,
    pub branch2b_bn: BatchNorm3d,
    pub branch2c: Conv3d,
    /// Final transform of the residual path; its scale parameters are
    /// eligible for zero initialization.
    pub branch2c_bn: BatchNorm3d,
    relu: ReLU,
}

impl PostactivatedBottleneckTransformation {
    pub fn new(config: &BottleneckConfig) -> Self {
        let (tk1, tk3) = config.temporal_kernel_split();
        let (str1x1, str3x3) = config.spatial_stride_split();

        // Tx1x1 conv, BN, ReLU.
        let branch2a = Conv3d::from_config(
            Conv3dConfig::new(config.dim_in, config.dim_inner, (tk1, 1, 1))
                .with_stride((1, str1x1, str1x1))
                .with_padding((tk1 / 2, 0, 0)),
        );
        let branch2a_bn = BatchNorm3d::new(config.dim_inner)
            .with_eps(config.bn_eps)
            .with_momentum(config.bn_mmt);

        // Tx3x3 group conv, BN, ReLU.
        let branch2b = Conv3d::from_config(
            Conv3dConfig::new(config.dim_inner, config.dim_inner, (tk3, 3, 3))
                .with_stride((config.temporal_stride, str3x3, str3x3))
                .with_padding((tk3 / 2, 1, 1))
                .with_groups(config.num_groups),
        );
        let branch2b_bn = BatchNorm3d::new(config.dim_inner)
            .with_eps(config.bn_eps)
            .with_momentum(config.bn_mmt);

        // 1x1x1 conv, BN.
        let branch2c = Conv3d::from_config(Conv3dConfig::new(
            config.dim_inner,
            config.dim_out,
            (1, 1, 1),
        ));
        let branch2c_bn = BatchNorm3d::new(config.dim_out)
            .with_eps(config.bn_eps)
            .with_momentum(config.bn_mmt);

        Self {
            branch2a,
            branch2a_bn,
            branch2b,
            branch2b_bn,
            branch2c,
            branch2c_bn,
            relu: ReLU::new(),
        }
    }

    pub fn init_parameters(&mut self, zero_init_final: bool) {
        self.branch2a.init_kaiming_normal();
        self.branch2a_bn.reset_parameters(1.0);
        self.branch2b.init_kaiming_normal();
        self.branch2b_bn.reset_parameters(1.0);
        self.branch2c.init_kaiming_normal();
        self.branch2c_bn
            .reset_parameters(if zero_init_final { 0.0 } else { 1.0 });
    }
}

impl Module for PostactivatedBottleneckTransformation {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        // Branch2a.
        let x = self.branch2a.forward(input)?;
        let x = self.branch2a_bn.forward(&x)?;
        let x = self.relu.forward(&x)?;

        // Branch2b.
        let x = self.branch2b.forward(&x)?;
        let x = self.branch2b_bn.forward(&x)?;
        let x = self.relu.forward(&x)?;

        // Branch2c.
        let x = self.branch2c.forward(&x)?;
        self.branch2c_bn.forward(&x)
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = self.branch2a.parameters();
        params.extend(self.branch2a_bn.parameters());
        params.extend(self.branch2b.parameters());
        params.extend(self.branch2b_bn.parameters());
        params.extend(self.branch2c.parameters());
        params.extend(self.branch2c_bn.parameters());
        params
    }

    fn set_training(&mut self, training: bool) {
        self.branch2a_bn.set_training(training);
        self.branch2b_bn.set_training(training);
        self.branch2c_bn.set_training(training);
    }
}

/// Pre-activated bottleneck transformation: the same Tx1x1, 1x3x3, 1x1x1
/// convolution pipeline, but normalization and ReLU precede each
/// convolution. The leading pair is dropped entirely when the block is
/// flagged `disable_pre_activation`.
pub struct PreactivatedBottleneckTransformation {
    /// Leading norm; `None` when pre-activation is disabled.
    pub branch2a_bn: Option<BatchNorm3d>,
    pub branch2a: Conv3d,
    pub branch2b_bn: BatchNorm3d,
    pub branch2b: Conv3d,
    pub branch2c_bn: BatchNorm3d,
    /// Final transform of the residual path; its weights are eligible for
    /// zero initialization (there is no trailing norm to tag instead).
    pub branch2c: Conv3d,
    relu: ReLU,
}

impl PreactivatedBottleneckTransformation {
    pub fn new(config: &BottleneckConfig) -> Self {
        let (tk1, tk3) = config.temporal_kernel_split();
        let (str1x1, str3x3) = config.spatial_stride_split();

        let branch2a_bn = if config.disable_pre_activation {
            None
        } else {
            Some(
                BatchNorm3d::new(config.dim_in)
                    .with_eps(config.bn_eps)
                    .with_momentum(config.bn_mmt),
            )
        };
        let branch2a = Conv3d::from_config(
            Conv3dConfig::new(config.dim_in, config.dim_inner, (tk1, 1, 1))
                .with_stride((1, str1x1, str1x1))
                .with_padding((tk1 / 2, 0, 0)),
        );

        let branch2b_bn = BatchNorm3d::new(config.dim_inner)
            .with_eps(config.bn_eps)
            .with_momentum(config.bn_mmt);
        let branch2b = Conv3d::from_config(
            Conv3dConfig::new(config.dim_inner, config.dim_inner, (tk3, 3, 3))
                .with_stride((config.temporal_stride, str3x3, str3x3))
                .with_padding((tk3 / 2, 1, 1))
                .with_groups(config.num_groups),
        );

        let branch2c_bn = BatchNorm3d::new(config.dim_inner)
            .with_eps(config.bn_eps)
            .with_momentum(config.bn_mmt);
        let branch2c = Conv3d::from_config(Conv3dConfig::new(
            config.dim_inner,
            config.dim_out,
            (1, 1, 1),
        ));

        Self {
            branch2a_bn,
            branch2a,
            branch2b_bn,
            branch2b,
            branch2c_bn,
            branch2c,
            relu: ReLU::new(),
        }
    }

    pub fn init_parameters(&mut self, zero_init_final: bool) {
        if let Some(bn) = &mut self.branch2a_bn {
            bn.reset_parameters(1.0);
        }
        self.branch2a.init_kaiming_normal();
        self.branch2b_bn.reset_parameters(1.0);
        self.branch2b.init_kaiming_normal();
        self.branch2c_bn.reset_parameters(1.0);
        if zero_init_final {
            self.branch2c.init_zero();
        } else {
            self.branch2c.init_kaiming_normal();
        }
    }
}

impl Module for PreactivatedBottleneckTransformation {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        // Branch2a.
        let x = match &self.branch2a_bn {
            Some(bn) => self.relu.forward(&bn.forward(input)?)?,
            None => input.clone(),
        };
        let x = self.branch2a.forward(&x)?;

        // Branch2b.
        let x = self.branch2b_bn.forward(&x)?;
        let x = self.relu.forward(&x)?;
        let x = self.branch2b.forward(&x)?;

        // Branch2c.
        let x = self.branch2c_bn.forward(&x)?;
        let x = self.relu.forward(&x)?;
        self.branch2c.forward(&x)
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = Vec::new();
        if let Some(bn) = &self.branch2a_bn {
            params.extend(bn.parameters());
        }
        params.extend(self.branch2a.parameters());
        params.extend(self.branch2b_bn.parameters());
        params.extend(self.branch2b.parameters());
        params.extend(self.branch2c_bn.parameters());
        params.extend(self.branch2c.parameters());
        params
    }

    fn set_training(&mut self, training: bool) {
        if let Some(bn) = &mut self.branch2a_bn {
            bn.set_training(training);
        }
        self.branch2b_bn.set_training(training);
        self.branch2c_bn.set_training(training);
    }
}

/// Residual-path strategy of a block.
pub enum ResidualTransformation {
    PostactivatedBottleneck(PostactivatedBottleneckTransformation),
    PreactivatedBottleneck(PreactivatedBottleneckTransformation),
}

impl ResidualTransformation {
    pub fn new(kind: ResidualTransformationType, config: &BottleneckConfig) -> Self {
        match kind {
            ResidualTransformationType::PostactivatedBottleneck => Self::PostactivatedBottleneck(
                PostactivatedBottleneckTransformation::new(config),
            ),
            ResidualTransformationType::PreactivatedBottleneck => {
                Self::PreactivatedBottleneck(PreactivatedBottleneckTransformation::new(config))
            }
        }
    }

    pub fn init_parameters(&mut self, zero_init_final: bool) {
        match self {
            Self::PostactivatedBottleneck(t) => t.init_parameters(zero_init_final),
            Self::PreactivatedBottleneck(t) => t.init_parameters(zero_init_final),
        }
    }
}

impl Module for ResidualTransformation {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        match self {
            Self::PostactivatedBottleneck(t) => t.forward(input),
            Self::PreactivatedBottleneck(t) => t.forward(input),
        }
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        match self {
            Self::PostactivatedBottleneck(t) => t.parameters(),
            Self::PreactivatedBottleneck(t) => t.parameters(),
        }
    }

    fn set_training(&mut self, training: bool) {
        match self {
            Self::PostactivatedBottleneck(t) => t.set_training(training),
            Self::PreactivatedBottleneck(t) => t.set_training(training),
        }
    }
}

/// Post-activated projection shortcut: a strided 1x1x1 convolution followed
/// by normalization, no activation.
pub struct PostactivatedShortcutTransformation {
    pub branch1: Conv3d,
    pub branch1_bn: BatchNorm3d,
}

impl PostactivatedShortcutTransformation {
    /// # Panics
    /// Panics unless the projection is actually required (a channel count
    /// or stride change across the block).
    pub fn new(config: &BottleneckConfig) -> Self {
        assert!(
            config.needs_projection(),
            "projection shortcut requires a channel or stride change"
        );
        let branch1 = Conv3d::from_config(
            Conv3dConfig::new(config.dim_in, config.dim_out, (1, 1, 1)).with_stride((
                config.temporal_stride,
                config.spatial_stride,
                config.spatial_stride,
            )),
        );
        let branch1_bn = BatchNorm3d::new(config.dim_out)
            .with_eps(config.bn_eps)
            .with_momentum(config.bn_mmt);
        Self { branch1, branch1_bn }
    }

    pub fn init_parameters(&mut self) {
        self.branch1.init_kaiming_normal();
        self.branch1_bn.reset_parameters(1.0);
    }
}

impl Module for PostactivatedShortcutTransformation {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let x = self.branch1.forward(input)?;
        self.branch1_bn.forward(&x)
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = self.branch1.parameters();
        params.extend(self.branch1_bn.parameters());
        params
    }

    fn set_training(&mut self, training: bool) {
        self.branch1_bn.set_training(training);
    }
}

/// Pre-activated projection shortcut: optional leading norm+ReLU (skipped
/// under `disable_pre_activation`) followed by the strided 1x1x1
/// convolution.
pub struct PreactivatedShortcutTransformation {
    pub branch1_bn: Option<BatchNorm3d>,
    pub branch1: Conv3d,
    /// Stride of the projection, kept for diagnostics.
    pub stride: (usize, usize, usize),
    relu: ReLU,
}

impl PreactivatedShortcutTransformation {
    /// # Panics
    /// Panics unless the projection is actually required (a channel count
    /// or stride change across the block).
    pub fn new(config: &BottleneckConfig) -> Self {
        assert!(
            config.needs_projection(),
            "projection shortcut requires a channel or stride change"
        );
        let branch1_bn = if config.disable_pre_activation {
            None
        } else {
            Some(
                BatchNorm3d::new(config.dim_in)
                    .with_eps(config.bn_eps)
                    .with_momentum(config.bn_mmt),
            )
        };
        let stride = (
            config.temporal_stride,
            config.spatial_stride,
            config.spatial_stride,
        );
        let branch1 = Conv3d::from_config(
            Conv3dConfig::new(config.dim_in, config.dim_out, (1, 1, 1)).with_stride(stride),
        );
        Self {
            branch1_bn,
            branch1,
            stride,
            relu: ReLU::new(),
        }
    }

    pub fn init_parameters(&mut self) {
        if let Some(bn) = &mut self.branch1_bn {
            bn.reset_parameters(1.0);
        }
        self.branch1.init_kaiming_normal();
    }
}

impl Module for PreactivatedShortcutTransformation {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let x = match &self.branch1_bn {
            Some(bn) => self.relu.forward(&bn.forward(input)?)?,
            None => input.clone(),
        };
        self.branch1.forward(&x)
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = Vec::new();
        if let Some(bn) = &self.branch1_bn {
            params.extend(bn.parameters());
        }
        params.extend(self.branch1.parameters());
        params
    }

    fn set_training(&mut self, training: bool) {
        if let Some(bn) = &mut self.branch1_bn {
            bn.set_training(training);
        }
    }
}

/// Skip-path strategy of a block: an identity pass-through when neither
/// channels nor strides change, a projection shortcut otherwise.
pub enum SkipTransformation {
    Identity(Identity),
    PostactivatedShortcut(PostactivatedShortcutTransformation),
    PreactivatedShortcut(PreactivatedShortcutTransformation),
}

impl SkipTransformation {
    /// Builds the identity pass-through skip path.
    pub fn identity() -> Self {
        Self::Identity(Identity::new())
    }

    /// Builds a projection shortcut of the selected kind.
    ///
    /// # Panics
    /// Panics if the config does not require a projection; instantiating a
    /// projection for an unchanged block is a programming error.
    pub fn projection(kind: SkipTransformationType, config: &BottleneckConfig) -> Self {
        match kind {
            SkipTransformationType::PostactivatedShortcut => {
                Self::PostactivatedShortcut(PostactivatedShortcutTransformation::new(config))
            }
            SkipTransformationType::PreactivatedShortcut => {
                Self::PreactivatedShortcut(PreactivatedShortcutTransformation::new(config))
            }
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity(_))
    }

    pub fn init_parameters(&mut self) {
        match self {
            Self::Identity(_) => {}
            Self::PostactivatedShortcut(t) => t.init_parameters(),
            Self::PreactivatedShortcut(t) => t.init_parameters(),
        }
    }
}

impl Module for SkipTransformation {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        match self {
            Self::Identity(layer) => layer.forward(input),
            Self::PostactivatedShortcut(t) => t.forward(input),
            Self::PreactivatedShortcut(t) => t.forward(input),
        }
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        match self {
            Self::Identity(layer) => layer.parameters(),
            Self::PostactivatedShortcut(t) => t.parameters(),
            Self::PreactivatedShortcut(t) => t.parameters(),
        }
    }

    fn set_training(&mut self, training: bool) {
        match self {
            Self::Identity(_) => {}
            Self::PostactivatedShortcut(t) => t.set_training(training),
            Self::PreactivatedShortcut(t) => t.set_training(training),
        }
    }
}
