//! Residual stage: one block sequence per pathway.

use crate::nn::module::Module;
use crate::nn::{BatchNorm3d, ReLU};
use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};

use super::block::ResBlock;
use super::transformation::{
    BottleneckConfig, ResidualTransformationType, SkipTransformationType,
};
use super::ModelError;

/// Configuration of one residual stage.
///
/// Each `Vec` field holds one entry per pathway; [`ResStageConfig::validate`]
/// rejects configurations whose per-pathway lists disagree in length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResStageConfig {
    /// Index of the stage within the model (the stage after the stem is 1).
    pub stage_idx: usize,
    /// Input channel count per pathway.
    pub dim_in: Vec<usize>,
    /// Output channel count per pathway.
    pub dim_out: Vec<usize>,
    /// Bottleneck channel count per pathway.
    pub dim_inner: Vec<usize>,
    /// Temporal kernel basis per pathway. The basis is cycled to produce a
    /// temporal kernel size for every block of the pathway; e.g. a basis of
    /// `[3, 1]` over five blocks yields `[3, 1, 3, 1, 3]`.
    pub temporal_kernel_basis: Vec<Vec<usize>>,
    /// Whether the temporal kernel goes on the 1x1-style conv, per pathway.
    pub temporal_conv_1x1: Vec<bool>,
    /// Temporal stride of the first block, per pathway.
    pub temporal_stride: Vec<usize>,
    /// Spatial stride of the first block, per pathway.
    pub spatial_stride: Vec<usize>,
    /// Number of blocks per pathway.
    pub num_blocks: Vec<usize>,
    /// Convolution group count (ResNeXt cardinality) per pathway.
    pub num_groups: Vec<usize>,
    /// Skip strategy shared by all blocks of the stage.
    pub skip_transformation_type: SkipTransformationType,
    /// Residual strategy shared by all blocks of the stage.
    pub residual_transformation_type: ResidualTransformationType,
    /// Batch normalization epsilon.
    pub bn_eps: f32,
    /// Batch normalization momentum.
    pub bn_mmt: f32,
    /// Drops the leading norm+activation of the first block's pre-activated
    /// transforms. Set for the stage directly after the stem.
    pub disable_pre_activation: bool,
    /// Marks the last stage of the model. A final pre-activated stage
    /// appends a trailing norm+ReLU per pathway, since its last block ends
    /// in a bare convolution.
    pub final_stage: bool,
}

impl ResStageConfig {
    fn validate(&self) -> Result<usize, ModelError> {
        let num_pathways = self.dim_in.len();
        if num_pathways == 0 {
            return Err(ModelError::Config(
                "stage config requires at least one pathway".to_string(),
            ));
        }
        let lengths = [
            self.dim_out.len(),
            self.dim_inner.len(),
            self.temporal_kernel_basis.len(),
            self.temporal_conv_1x1.len(),
            self.temporal_stride.len(),
            self.spatial_stride.len(),
            self.num_blocks.len(),
            self.num_groups.len(),
        ];
        if lengths.iter().any(|&l| l != num_pathways) {
            return Err(ModelError::Config(format!(
                "stage {}: per-pathway lists disagree in length (dim_in has {})",
                self.stage_idx, num_pathways
            )));
        }
        if self.temporal_kernel_basis.iter().any(|b| b.is_empty()) {
            return Err(ModelError::Config(format!(
                "stage {}: empty temporal kernel basis",
                self.stage_idx
            )));
        }
        Ok(num_pathways)
    }
}

/// Cycles a temporal kernel basis to cover `num_blocks` blocks.
fn temporal_kernel_sizes(basis: &[usize], num_blocks: usize) -> Vec<usize> {
    basis.iter().copied().cycle().take(num_blocks).collect()
}

struct StagePathway {
    blocks: Vec<ResBlock>,
    /// Trailing norm+ReLU of a final pre-activated stage.
    final_activation: Option<(BatchNorm3d, ReLU)>,
}

impl StagePathway {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let mut x = input.clone();
        for block in &self.blocks {
            x = block.forward(&x)?;
        }
        if let Some((bn, relu)) = &self.final_activation {
            x = relu.forward(&bn.forward(&x)?)?;
        }
        Ok(x)
    }
}

/// One residual stage of the model.
///
/// The stage owns `num_blocks[p]` blocks for every pathway `p`. Only the
/// first block of a pathway changes dimensions and applies the stage
/// strides; the remaining blocks preserve the shape.
pub struct ResStage {
    pub stage_idx: usize,
    num_pathways: usize,
    pathways: Vec<StagePathway>,
}

impl ResStage {
    pub fn new(config: &ResStageConfig) -> Result<Self, ModelError> {
        let num_pathways = config.validate()?;
        let mut pathways = Vec::with_capacity(num_pathways);

        for p in 0..num_pathways {
            let kernel_sizes =
                temporal_kernel_sizes(&config.temporal_kernel_basis[p], config.num_blocks[p]);
            let mut blocks = Vec::with_capacity(config.num_blocks[p]);

            for (i, &temporal_kernel_size) in kernel_sizes.iter().enumerate() {
                let first = i == 0;
                let dim_in = if first { config.dim_in[p] } else { config.dim_out[p] };
                let mut block_cfg = BottleneckConfig::new(dim_in, config.dim_out[p], config.dim_inner[p])
                    .with_temporal_kernel_size(temporal_kernel_size)
                    .with_temporal_conv_1x1(config.temporal_conv_1x1[p])
                    .with_strides(
                        if first { config.temporal_stride[p] } else { 1 },
                        if first { config.spatial_stride[p] } else { 1 },
                    )
                    .with_num_groups(config.num_groups[p])
                    .with_disable_pre_activation(config.disable_pre_activation && first);
                block_cfg.bn_eps = config.bn_eps;
                block_cfg.bn_mmt = config.bn_mmt;

                blocks.push(ResBlock::new(
                    config.skip_transformation_type,
                    config.residual_transformation_type,
                    &block_cfg,
                ));
            }

            let final_activation = if config.final_stage
                && config.residual_transformation_type
                    == ResidualTransformationType::PreactivatedBottleneck
            {
                Some((
                    BatchNorm3d::new(config.dim_out[p])
                        .with_eps(config.bn_eps)
                        .with_momentum(config.bn_mmt),
                    ReLU::new(),
                ))
            } else {
                None
            };

            pathways.push(StagePathway {
                blocks,
                final_activation,
            });
        }

        Ok(Self {
            stage_idx: config.stage_idx,
            num_pathways,
            pathways,
        })
    }

    pub fn num_pathways(&self) -> usize {
        self.num_pathways
    }

    /// Runs every pathway on its input tensor.
    pub fn forward_pathways(
        &self,
        inputs: &[ArrayD<f32>],
    ) -> Result<Vec<ArrayD<f32>>, ModelError> {
        if inputs.len() != self.num_pathways {
            return Err(ModelError::PathwayCount {
                expected: self.num_pathways,
                actual: inputs.len(),
            });
        }
        self.pathways
            .iter()
            .zip(inputs)
            .map(|(pathway, input)| pathway.forward(input))
            .collect()
    }

    pub fn init_parameters(&mut self, zero_init_final_transform: bool) {
        for pathway in &mut self.pathways {
            for block in &mut pathway.blocks {
                block.init_parameters(zero_init_final_transform);
            }
            if let Some((bn, _)) = &mut pathway.final_activation {
                bn.reset_parameters(1.0);
            }
        }
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = Vec::new();
        for pathway in &self.pathways {
            for block in &pathway.blocks {
                params.extend(block.parameters());
            }
            if let Some((bn, _)) = &pathway.final_activation {
                params.extend(bn.parameters());
            }
        }
        params
    }

    pub fn set_training(&mut self, training: bool) {
        for pathway in &mut self.pathways {
            for block in &mut pathway.blocks {
                block.set_training(training);
            }
            if let Some((bn, _)) = &mut pathway.final_activation {
                bn.set_training(training);
            }
        }
    }

    /// Blocks of one pathway, in execution order.
    pub fn blocks(&self, pathway: usize) -> &[ResBlock] {
        &self.pathways[pathway].blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn single_pathway_config() -> ResStageConfig {
        ResStageConfig {
            stage_idx: 1,
            dim_in: vec![8],
            dim_out: vec![16],
            dim_inner: vec![4],
            temporal_kernel_basis: vec![vec![3]],
            temporal_conv_1x1: vec![true],
            temporal_stride: vec![1],
            spatial_stride: vec![2],
            num_blocks: vec![3],
            num_groups: vec![1],
            skip_transformation_type: SkipTransformationType::PostactivatedShortcut,
            residual_transformation_type: ResidualTransformationType::PostactivatedBottleneck,
            bn_eps: crate::nn::batchnorm::DEFAULT_EPS,
            bn_mmt: crate::nn::batchnorm::DEFAULT_MOMENTUM,
            disable_pre_activation: false,
            final_stage: false,
        }
    }

    #[test]
    fn test_temporal_kernel_basis_cycles() {
        assert_eq!(temporal_kernel_sizes(&[3, 1], 5), vec![3, 1, 3, 1, 3]);
        assert_eq!(temporal_kernel_sizes(&[3], 4), vec![3, 3, 3, 3]);
        assert_eq!(temporal_kernel_sizes(&[1, 3], 2), vec![1, 3]);
    }

    #[test]
    fn test_mismatched_pathway_lists_rejected() {
        let mut cfg = single_pathway_config();
        cfg.dim_out = vec![16, 32];
        assert!(matches!(ResStage::new(&cfg), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_empty_basis_rejected() {
        let mut cfg = single_pathway_config();
        cfg.temporal_kernel_basis = vec![vec![]];
        assert!(matches!(ResStage::new(&cfg), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_only_first_block_projects() {
        let stage = ResStage::new(&single_pathway_config()).unwrap();
        let blocks = stage.blocks(0);
        assert_eq!(blocks.len(), 3);
        assert!(!blocks[0].skip.is_identity());
        assert!(blocks[1].skip.is_identity());
        assert!(blocks[2].skip.is_identity());
    }

    #[test]
    fn test_forward_shapes_and_pathway_count() {
        let mut stage = ResStage::new(&single_pathway_config()).unwrap();
        stage.init_parameters(false);

        let input = vec![ArrayD::<f32>::ones(IxDyn(&[1, 8, 4, 8, 8]))];
        let outputs = stage.forward_pathways(&input).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].shape(), &[1, 16, 4, 4, 4]);

        let err = stage.forward_pathways(&[]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::PathwayCount {
                expected: 1,
                actual: 0
            }
        ));
    }

    #[test]
    fn test_final_preactivated_stage_has_trailing_activation() {
        let mut cfg = single_pathway_config();
        cfg.residual_transformation_type = ResidualTransformationType::PreactivatedBottleneck;
        cfg.skip_transformation_type = SkipTransformationType::PreactivatedShortcut;
        cfg.final_stage = true;
        let stage = ResStage::new(&cfg).unwrap();
        assert!(stage.pathways[0].final_activation.is_some());

        cfg.final_stage = false;
        let stage = ResStage::new(&cfg).unwrap();
        assert!(stage.pathways[0].final_activation.is_none());
    }
}
