//! Residual block: skip path + residual path, summed and activated.

use crate::nn::module::{LayerError, Module};
use crate::nn::ReLU;
use ndarray::{ArrayD, ArrayViewD};

use super::transformation::{
    BottleneckConfig, ResidualTransformation, ResidualTransformationType, SkipTransformation,
    SkipTransformationType,
};

/// One residual block.
///
/// The skip path is the identity when neither the channel count nor a
/// stride changes across the block, and a projection shortcut of the
/// selected kind otherwise. The outputs of both paths are summed
/// elementwise and passed through ReLU.
pub struct ResBlock {
    pub skip: SkipTransformation,
    pub residual: ResidualTransformation,
    relu: ReLU,
}

impl ResBlock {
    pub fn new(
        skip_kind: SkipTransformationType,
        residual_kind: ResidualTransformationType,
        config: &BottleneckConfig,
    ) -> Self {
        let skip = if config.needs_projection() {
            SkipTransformation::projection(skip_kind, config)
        } else {
            SkipTransformation::identity()
        };
        let residual = ResidualTransformation::new(residual_kind, config);
        Self {
            skip,
            residual,
            relu: ReLU::new(),
        }
    }

    pub fn init_parameters(&mut self, zero_init_final_transform: bool) {
        self.skip.init_parameters();
        self.residual.init_parameters(zero_init_final_transform);
    }
}

impl Module for ResBlock {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let skip_out = self.skip.forward(input)?;
        let residual_out = self.residual.forward(input)?;
        if skip_out.shape() != residual_out.shape() {
            return Err(LayerError::Shape(format!(
                "ResBlock: skip path produced {:?}, residual path produced {:?}",
                skip_out.shape(),
                residual_out.shape()
            )));
        }
        self.relu.forward(&(&skip_out + &residual_out))
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = self.skip.parameters();
        params.extend(self.residual.parameters());
        params
    }

    fn set_training(&mut self, training: bool) {
        self.skip.set_training(training);
        self.residual.set_training(training);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_identity_skip_when_shape_preserved() {
        let cfg = BottleneckConfig::new(8, 8, 4);
        let block = ResBlock::new(
            SkipTransformationType::PostactivatedShortcut,
            ResidualTransformationType::PostactivatedBottleneck,
            &cfg,
        );
        assert!(block.skip.is_identity());
    }

    #[test]
    fn test_projection_skip_when_channels_change() {
        let cfg = BottleneckConfig::new(8, 16, 4);
        let block = ResBlock::new(
            SkipTransformationType::PostactivatedShortcut,
            ResidualTransformationType::PostactivatedBottleneck,
            &cfg,
        );
        assert!(!block.skip.is_identity());
    }

    #[test]
    fn test_forward_is_relu_of_sum() {
        let cfg = BottleneckConfig::new(4, 4, 2);
        let mut block = ResBlock::new(
            SkipTransformationType::PostactivatedShortcut,
            ResidualTransformationType::PostactivatedBottleneck,
            &cfg,
        );
        block.init_parameters(false);

        let input = ArrayD::from_shape_fn(IxDyn(&[1, 4, 2, 4, 4]), |idx| {
            (idx[1] as f32 - 1.5) * 0.25 + idx[3] as f32 * 0.1
        });
        let residual_out = block.residual.forward(&input).unwrap();
        let expected = (&input + &residual_out).mapv(|v| v.max(0.0));
        let output = block.forward(&input).unwrap();
        assert_eq!(output.shape(), expected.shape());
        for (o, e) in output.iter().zip(expected.iter()) {
            assert!((o - e).abs() < 1e-5);
        }
    }

    #[test]
    fn test_strided_block_paths_agree() {
        let cfg = BottleneckConfig::new(4, 8, 2).with_strides(2, 2);
        let mut block = ResBlock::new(
            SkipTransformationType::PreactivatedShortcut,
            ResidualTransformationType::PreactivatedBottleneck,
            &cfg,
        );
        block.init_parameters(true);
        let input = ArrayD::<f32>::ones(IxDyn(&[1, 4, 4, 8, 8]));
        let output = block.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 8, 2, 4, 4]);
    }
}
