//! Top-level ResNeXt3D model: stem, residual stages, classification head.

use ndarray::{Array2, ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};

use super::head::FullyConvolutionalLinearHead;
use super::stage::{ResStage, ResStageConfig};
use super::stem::ResNeXt3DStem;
use super::transformation::{ResidualTransformationType, SkipTransformationType};
use super::ModelError;

/// Full architecture description of a ResNeXt3D model.
///
/// Per-stage lists (`num_blocks`, `stage_temporal_kernel_basis`, ...) must
/// agree in length; [`ResNeXt3DConfig::build`] rejects inconsistent
/// configurations. Channel schedules are derived, not configured: stage `s`
/// (zero-based) outputs `stage_planes * 2^s` channels from a bottleneck of
/// `num_groups * width_per_group * 2^s` channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResNeXt3DConfig {
    /// Channel count of the input clip (3 for RGB).
    pub input_planes: usize,
    /// Spatial crop size the model was configured for. Descriptive
    /// metadata; forward accepts any spatial extent the pooling admits.
    pub clip_crop_size: usize,
    /// Temporal length the model was configured for. Descriptive metadata.
    pub frames_per_clip: usize,
    /// Stem output channels.
    pub stem_planes: usize,
    /// Temporal kernel size of the stem convolution.
    pub stem_temporal_kernel: usize,
    /// Spatial kernel size of the stem convolution.
    pub stem_spatial_kernel: usize,
    /// Whether the stem appends a [1, 3, 3] max pool.
    pub stem_maxpool: bool,
    /// Blocks per stage.
    pub num_blocks: Vec<usize>,
    /// Output channels of the first stage; doubled every following stage.
    pub stage_planes: usize,
    /// Temporal kernel basis per stage, cycled over the stage's blocks.
    pub stage_temporal_kernel_basis: Vec<Vec<usize>>,
    /// Whether the temporal kernel goes on the 1x1-style conv, per stage.
    pub temporal_conv_1x1: Vec<bool>,
    /// Temporal stride of the first block of each stage.
    pub stage_temporal_stride: Vec<usize>,
    /// Spatial stride of the first block of each stage.
    pub stage_spatial_stride: Vec<usize>,
    /// ResNeXt cardinality.
    pub num_groups: usize,
    /// Bottleneck width per group of the first stage.
    pub width_per_group: usize,
    /// Skip strategy shared by all stages.
    pub skip_transformation_type: SkipTransformationType,
    /// Residual strategy shared by all stages.
    pub residual_transformation_type: ResidualTransformationType,
    /// Zero-initializes the final transform of every residual path, so each
    /// block starts as the identity (plus its skip projection).
    pub zero_init_residual_transform: bool,
    /// Number of output classes.
    pub num_classes: usize,
    /// Fixed head pool window [T, H, W]; `None` selects global adaptive
    /// pooling.
    pub head_pool_size: Option<(usize, usize, usize)>,
    /// Whether the head applies dropout between pooling and projection.
    pub use_dropout: bool,
    /// Dropout probability of the head.
    pub dropout_ratio: f32,
}

impl ResNeXt3DConfig {
    /// Pre-activated ResNeXt3D-50 reference configuration for 8-frame
    /// 224x224 clips and 400 classes.
    pub fn preact_i3d50() -> Self {
        Self {
            input_planes: 3,
            clip_crop_size: 224,
            frames_per_clip: 8,
            stem_planes: 32,
            stem_temporal_kernel: 3,
            stem_spatial_kernel: 5,
            stem_maxpool: true,
            num_blocks: vec![3, 4, 6, 3],
            stage_planes: 256,
            stage_temporal_kernel_basis: vec![vec![3], vec![3, 1], vec![3, 1], vec![1, 3]],
            temporal_conv_1x1: vec![true, true, true, true],
            stage_temporal_stride: vec![1, 2, 1, 1],
            stage_spatial_stride: vec![1, 2, 2, 2],
            num_groups: 1,
            width_per_group: 64,
            skip_transformation_type: SkipTransformationType::PreactivatedShortcut,
            residual_transformation_type: ResidualTransformationType::PreactivatedBottleneck,
            zero_init_residual_transform: true,
            num_classes: 400,
            head_pool_size: Some((4, 7, 7)),
            use_dropout: true,
            dropout_ratio: 0.5,
        }
    }

    /// Post-activated ResNeXt3D-50 reference configuration for 8-frame
    /// 224x224 clips and 400 classes.
    pub fn postact_i3d50() -> Self {
        Self {
            input_planes: 3,
            clip_crop_size: 224,
            frames_per_clip: 8,
            stem_planes: 64,
            stem_temporal_kernel: 5,
            stem_spatial_kernel: 7,
            stem_maxpool: true,
            num_blocks: vec![3, 4, 6, 3],
            stage_planes: 256,
            stage_temporal_kernel_basis: vec![vec![3], vec![3, 1], vec![3, 1], vec![1, 3]],
            temporal_conv_1x1: vec![true, true, true, true],
            stage_temporal_stride: vec![1, 1, 1, 1],
            stage_spatial_stride: vec![1, 2, 2, 2],
            num_groups: 1,
            width_per_group: 64,
            skip_transformation_type: SkipTransformationType::PostactivatedShortcut,
            residual_transformation_type: ResidualTransformationType::PostactivatedBottleneck,
            zero_init_residual_transform: true,
            num_classes: 400,
            head_pool_size: Some((8, 7, 7)),
            use_dropout: true,
            dropout_ratio: 0.5,
        }
    }

    fn validate(&self) -> Result<usize, ModelError> {
        let num_stages = self.num_blocks.len();
        if num_stages == 0 {
            return Err(ModelError::Config(
                "model requires at least one stage".to_string(),
            ));
        }
        let lengths = [
            self.stage_temporal_kernel_basis.len(),
            self.temporal_conv_1x1.len(),
            self.stage_temporal_stride.len(),
            self.stage_spatial_stride.len(),
        ];
        if lengths.iter().any(|&l| l != num_stages) {
            return Err(ModelError::Config(format!(
                "per-stage lists disagree in length (num_blocks has {})",
                num_stages
            )));
        }
        if self.input_planes == 0 || self.stem_planes == 0 || self.num_classes == 0 {
            return Err(ModelError::Config(
                "channel and class counts must be non-zero".to_string(),
            ));
        }
        Ok(num_stages)
    }

    /// Builds the model and applies the initialization policy to the fully
    /// constructed module tree.
    pub fn build(&self) -> Result<ResNeXt3D, ModelError> {
        let num_stages = self.validate()?;

        let mut stem = ResNeXt3DStem::new(
            self.stem_temporal_kernel,
            self.stem_spatial_kernel,
            self.input_planes,
            self.stem_planes,
            self.stem_maxpool,
        )?;

        // Channel schedule: each stage doubles the previous one.
        let out_planes: Vec<usize> = (0..num_stages)
            .map(|s| self.stage_planes * (1 << s))
            .collect();
        let inner_planes: Vec<usize> = (0..num_stages)
            .map(|s| self.num_groups * self.width_per_group * (1 << s))
            .collect();

        let mut stages = Vec::with_capacity(num_stages);
        for s in 0..num_stages {
            let dim_in = if s == 0 {
                self.stem_planes
            } else {
                out_planes[s - 1]
            };
            let stage_cfg = ResStageConfig {
                stage_idx: s + 1,
                dim_in: vec![dim_in],
                dim_out: vec![out_planes[s]],
                dim_inner: vec![inner_planes[s]],
                temporal_kernel_basis: vec![self.stage_temporal_kernel_basis[s].clone()],
                temporal_conv_1x1: vec![self.temporal_conv_1x1[s]],
                temporal_stride: vec![self.stage_temporal_stride[s]],
                spatial_stride: vec![self.stage_spatial_stride[s]],
                num_blocks: vec![self.num_blocks[s]],
                num_groups: vec![self.num_groups],
                skip_transformation_type: self.skip_transformation_type,
                residual_transformation_type: self.residual_transformation_type,
                bn_eps: crate::nn::batchnorm::DEFAULT_EPS,
                bn_mmt: crate::nn::batchnorm::DEFAULT_MOMENTUM,
                // The stem already ends in norm+ReLU, so the first block of
                // the first stage skips its leading pre-activation pair.
                disable_pre_activation: s == 0,
                final_stage: s == num_stages - 1,
            };
            stages.push(ResStage::new(&stage_cfg)?);
        }

        let head_in_plane = *out_planes.last().expect("validated at least one stage");
        let mut head = FullyConvolutionalLinearHead::new(
            self.num_classes,
            head_in_plane,
            self.head_pool_size,
            self.use_dropout,
            self.dropout_ratio,
        );

        stem.init_parameters();
        for stage in &mut stages {
            stage.init_parameters(self.zero_init_residual_transform);
        }
        head.init_parameters();

        Ok(ResNeXt3D {
            input_planes: self.input_planes,
            clip_crop_size: self.clip_crop_size,
            frames_per_clip: self.frames_per_clip,
            stem,
            stages,
            head,
        })
    }
}

/// ResNeXt3D video classification model.
///
/// Accepts a clip tensor of shape [N, C, T, H, W] and produces per-clip
/// class scores: raw flattened logits in training mode, an averaged class
/// distribution in inference mode (see
/// [`super::head::FullyConvolutionalLinear`]).
pub struct ResNeXt3D {
    input_planes: usize,
    clip_crop_size: usize,
    frames_per_clip: usize,
    pub stem: ResNeXt3DStem,
    pub stages: Vec<ResStage>,
    pub head: FullyConvolutionalLinearHead,
}

impl ResNeXt3D {
    pub fn forward(&self, input: &ArrayD<f32>) -> Result<Array2<f32>, ModelError> {
        if input.ndim() != 5 {
            return Err(ModelError::Config(format!(
                "model input must be [N, C, T, H, W], got rank {}",
                input.ndim()
            )));
        }
        if input.shape()[1] != self.input_planes {
            return Err(ModelError::Config(format!(
                "model input has {} channels, expected {}",
                input.shape()[1],
                self.input_planes
            )));
        }

        let mut pathways = self.stem.forward_pathways(std::slice::from_ref(input))?;
        for stage in &self.stages {
            pathways = stage.forward_pathways(&pathways)?;
        }
        let features = pathways
            .into_iter()
            .next()
            .expect("stem produces one tensor per pathway");
        Ok(self.head.forward(&features)?)
    }

    /// Puts the whole model in training mode.
    pub fn train(&mut self) {
        self.set_training(true);
    }

    /// Puts the whole model in inference mode.
    pub fn eval(&mut self) {
        self.set_training(false);
    }

    pub fn set_training(&mut self, training: bool) {
        self.stem.set_training(training);
        for stage in &mut self.stages {
            stage.set_training(training);
        }
        self.head.set_training(training);
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = self.stem.parameters();
        for stage in &self.stages {
            params.extend(stage.parameters());
        }
        params.extend(self.head.parameters());
        params
    }

    /// Total number of trainable scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }

    /// Channel count the model expects in its input clips.
    pub fn input_planes(&self) -> usize {
        self.input_planes
    }

    /// Spatial crop size the model was configured for.
    pub fn clip_crop_size(&self) -> usize {
        self.clip_crop_size
    }

    /// Temporal clip length the model was configured for.
    pub fn frames_per_clip(&self) -> usize {
        self.frames_per_clip
    }
}

/// Pretrained weight sets for [`resnext3d_preact_i3d50`]. None are shipped;
/// the factory accepts `None` and builds a freshly initialized model.
#[derive(Debug, Clone, Copy)]
pub enum ResNeXt3DPreActI3D50Weights {}

/// Pretrained weight sets for [`resnext3d_postact_i3d50`]. None are
/// shipped; the factory accepts `None` and builds a freshly initialized
/// model.
#[derive(Debug, Clone, Copy)]
pub enum ResNeXt3DPostActI3D50Weights {}

/// Builds the pre-activated ResNeXt3D-50 reference model.
pub fn resnext3d_preact_i3d50(
    weights: Option<ResNeXt3DPreActI3D50Weights>,
) -> Result<ResNeXt3D, ModelError> {
    match weights {
        Some(w) => match w {},
        None => {}
    }
    ResNeXt3DConfig::preact_i3d50().build()
}

/// Builds the post-activated ResNeXt3D-50 reference model.
pub fn resnext3d_postact_i3d50(
    weights: Option<ResNeXt3DPostActI3D50Weights>,
) -> Result<ResNeXt3D, ModelError> {
    match weights {
        Some(w) => match w {},
        None => {}
    }
    ResNeXt3DConfig::postact_i3d50().build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnext3d::transformation::ResidualTransformation;
    use ndarray::{ArrayD, IxDyn};

    /// A two-stage miniature of the reference architectures, small enough
    /// to run shape and initialization checks quickly.
    fn tiny_config(
        skip: SkipTransformationType,
        residual: ResidualTransformationType,
    ) -> ResNeXt3DConfig {
        ResNeXt3DConfig {
            input_planes: 3,
            clip_crop_size: 16,
            frames_per_clip: 4,
            stem_planes: 4,
            stem_temporal_kernel: 3,
            stem_spatial_kernel: 3,
            stem_maxpool: false,
            num_blocks: vec![2, 2],
            stage_planes: 8,
            stage_temporal_kernel_basis: vec![vec![3], vec![3, 1]],
            temporal_conv_1x1: vec![true, true],
            stage_temporal_stride: vec![1, 2],
            stage_spatial_stride: vec![1, 2],
            num_groups: 2,
            width_per_group: 2,
            skip_transformation_type: skip,
            residual_transformation_type: residual,
            zero_init_residual_transform: false,
            num_classes: 6,
            head_pool_size: None,
            use_dropout: false,
            dropout_ratio: 0.5,
        }
    }

    #[test]
    fn test_tiny_model_forward_shapes() {
        let mut model = tiny_config(
            SkipTransformationType::PostactivatedShortcut,
            ResidualTransformationType::PostactivatedBottleneck,
        )
        .build()
        .unwrap();
        model.eval();

        let input = ArrayD::<f32>::ones(IxDyn(&[2, 3, 4, 16, 16]));
        let output = model.forward(&input).unwrap();
        assert_eq!(output.shape(), &[2, 6]);
        for row in output.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_tiny_preactivated_model_forward() {
        let mut model = tiny_config(
            SkipTransformationType::PreactivatedShortcut,
            ResidualTransformationType::PreactivatedBottleneck,
        )
        .build()
        .unwrap();
        model.eval();
        let input = ArrayD::<f32>::ones(IxDyn(&[1, 3, 4, 16, 16]));
        let output = model.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 6]);
    }

    #[test]
    fn test_input_validation() {
        let model = tiny_config(
            SkipTransformationType::PostactivatedShortcut,
            ResidualTransformationType::PostactivatedBottleneck,
        )
        .build()
        .unwrap();
        // Wrong rank.
        let bad_rank = ArrayD::<f32>::zeros(IxDyn(&[3, 4, 16, 16]));
        assert!(model.forward(&bad_rank).is_err());
        // Wrong channel count.
        let bad_channels = ArrayD::<f32>::zeros(IxDyn(&[1, 4, 4, 16, 16]));
        assert!(model.forward(&bad_channels).is_err());
    }

    #[test]
    fn test_mismatched_stage_lists_rejected() {
        let mut cfg = tiny_config(
            SkipTransformationType::PostactivatedShortcut,
            ResidualTransformationType::PostactivatedBottleneck,
        );
        cfg.stage_temporal_stride = vec![1];
        assert!(matches!(cfg.build(), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_zero_init_residual_transform() {
        let mut cfg = tiny_config(
            SkipTransformationType::PostactivatedShortcut,
            ResidualTransformationType::PostactivatedBottleneck,
        );
        cfg.zero_init_residual_transform = true;
        let model = cfg.build().unwrap();
        for stage in &model.stages {
            for block in stage.blocks(0) {
                match &block.residual {
                    ResidualTransformation::PostactivatedBottleneck(t) => {
                        assert!(t.branch2c_bn.gamma.iter().all(|&v| v == 0.0));
                        assert!(t.branch2a.weight.iter().any(|&v| v != 0.0));
                    }
                    ResidualTransformation::PreactivatedBottleneck(t) => {
                        assert!(t.branch2c.weight.iter().all(|&v| v == 0.0));
                    }
                }
            }
        }
    }

    #[test]
    fn test_reference_configs_build() {
        let preact = ResNeXt3DConfig::preact_i3d50();
        assert_eq!(preact.num_blocks, vec![3, 4, 6, 3]);
        assert!(preact.zero_init_residual_transform);
        assert!(preact.use_dropout);
        let model = preact.build().unwrap();
        // Stage outputs 256, 512, 1024, 2048; the head projects 2048 -> 400.
        assert_eq!(model.head.head_fcl.projection.in_features(), 2048);
        assert_eq!(model.head.head_fcl.projection.out_features(), 400);
        assert_eq!(model.input_planes(), 3);
        assert_eq!(model.clip_crop_size(), 224);
        assert_eq!(model.frames_per_clip(), 8);

        let postact = ResNeXt3DConfig::postact_i3d50();
        assert!(postact.zero_init_residual_transform);
        assert!(postact.use_dropout);
        let model = postact.build().unwrap();
        assert_eq!(model.head.head_fcl.projection.in_features(), 2048);
        assert!(model.num_parameters() > 10_000_000);
    }

    #[test]
    fn test_reference_configs_zero_init_final_transforms() {
        // Every residual path of both reference models starts as a zero
        // mapping: the post-activated blocks through their final BN scale,
        // the pre-activated blocks through their final conv weights.
        let postact = ResNeXt3DConfig::postact_i3d50().build().unwrap();
        for stage in &postact.stages {
            for block in stage.blocks(0) {
                match &block.residual {
                    ResidualTransformation::PostactivatedBottleneck(t) => {
                        assert!(t.branch2c_bn.gamma.iter().all(|&v| v == 0.0));
                        assert!(t.branch2a.weight.iter().any(|&v| v != 0.0));
                    }
                    ResidualTransformation::PreactivatedBottleneck(_) => {
                        unreachable!("post-activated reference config")
                    }
                }
            }
        }

        let preact = ResNeXt3DConfig::preact_i3d50().build().unwrap();
        for stage in &preact.stages {
            for block in stage.blocks(0) {
                match &block.residual {
                    ResidualTransformation::PreactivatedBottleneck(t) => {
                        assert!(t.branch2c.weight.iter().all(|&v| v == 0.0));
                        assert!(t.branch2b.weight.iter().any(|&v| v != 0.0));
                    }
                    ResidualTransformation::PostactivatedBottleneck(_) => {
                        unreachable!("pre-activated reference config")
                    }
                }
            }
        }
    }

    #[test]
    fn test_factories_build_without_weights() {
        assert!(resnext3d_preact_i3d50(None).is_ok());
        assert!(resnext3d_postact_i3d50(None).is_ok());
    }
}
