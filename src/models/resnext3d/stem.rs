//! Video model stem: the first convolution block before the residual
//! stages.

use crate::nn::module::{LayerError, Module};
use crate::nn::{BatchNorm3d, Conv3d, Conv3dConfig, MaxPool3d, ReLU};
use ndarray::{ArrayD, ArrayViewD};

use super::ModelError;

/// Stem of one pathway: conv, BN, ReLU and an optional spatial max pool.
///
/// The convolution uses kernel [kT, kH, kW], the given stride and padding
/// [kT/2, kH/2, kW/2]. The pool, when enabled, is the usual [1, 3, 3]
/// window with stride [1, 2, 2] and padding [0, 1, 1].
pub struct ResNeXt3DStemSinglePathway {
    pub conv: Conv3d,
    pub bn: BatchNorm3d,
    relu: ReLU,
    pool: Option<MaxPool3d>,
}

impl ResNeXt3DStemSinglePathway {
    pub fn new(
        dim_in: usize,
        dim_out: usize,
        kernel: (usize, usize, usize),
        stride: (usize, usize, usize),
        bn_eps: f32,
        bn_mmt: f32,
        maxpool: bool,
    ) -> Self {
        let (kt, kh, kw) = kernel;
        let conv = Conv3d::from_config(
            Conv3dConfig::new(dim_in, dim_out, kernel)
                .with_stride(stride)
                .with_padding((kt / 2, kh / 2, kw / 2)),
        );
        let bn = BatchNorm3d::new(dim_out)
            .with_eps(bn_eps)
            .with_momentum(bn_mmt);
        let pool = if maxpool {
            Some(MaxPool3d::new((1, 3, 3), (1, 2, 2)).with_padding((0, 1, 1)))
        } else {
            None
        };
        Self {
            conv,
            bn,
            relu: ReLU::new(),
            pool,
        }
    }

    pub fn init_parameters(&mut self) {
        self.conv.init_kaiming_normal();
        self.bn.reset_parameters(1.0);
    }
}

impl Module for ResNeXt3DStemSinglePathway {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let x = self.conv.forward(input)?;
        let x = self.bn.forward(&x)?;
        let x = self.relu.forward(&x)?;
        match &self.pool {
            Some(pool) => pool.forward(&x),
            None => Ok(x),
        }
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = self.conv.parameters();
        params.extend(self.bn.parameters());
        params
    }

    fn set_training(&mut self, training: bool) {
        self.bn.set_training(training);
    }
}

/// Multi-pathway stem: one single-pathway stem block per input tensor.
pub struct ResNeXt3DStemMultiPathway {
    blocks: Vec<ResNeXt3DStemSinglePathway>,
}

impl ResNeXt3DStemMultiPathway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dim_in: &[usize],
        dim_out: &[usize],
        kernel: &[(usize, usize, usize)],
        stride: &[(usize, usize, usize)],
        bn_eps: f32,
        bn_mmt: f32,
        maxpool: &[bool],
    ) -> Result<Self, ModelError> {
        let num_pathways = dim_in.len();
        if num_pathways == 0 {
            return Err(ModelError::Config(
                "stem requires at least one pathway".to_string(),
            ));
        }
        if dim_out.len() != num_pathways
            || kernel.len() != num_pathways
            || stride.len() != num_pathways
            || maxpool.len() != num_pathways
        {
            return Err(ModelError::Config(format!(
                "stem: per-pathway lists disagree in length (dim_in has {})",
                num_pathways
            )));
        }

        let blocks = (0..num_pathways)
            .map(|p| {
                ResNeXt3DStemSinglePathway::new(
                    dim_in[p],
                    dim_out[p],
                    kernel[p],
                    stride[p],
                    bn_eps,
                    bn_mmt,
                    maxpool[p],
                )
            })
            .collect();
        Ok(Self { blocks })
    }

    pub fn num_pathways(&self) -> usize {
        self.blocks.len()
    }

    pub fn forward_pathways(
        &self,
        inputs: &[ArrayD<f32>],
    ) -> Result<Vec<ArrayD<f32>>, ModelError> {
        if inputs.len() != self.blocks.len() {
            return Err(ModelError::PathwayCount {
                expected: self.blocks.len(),
                actual: inputs.len(),
            });
        }
        self.blocks
            .iter()
            .zip(inputs)
            .map(|(block, input)| block.forward(input).map_err(ModelError::from))
            .collect()
    }

    pub fn init_parameters(&mut self) {
        for block in &mut self.blocks {
            block.init_parameters();
        }
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.blocks.iter().flat_map(|b| b.parameters()).collect()
    }

    pub fn set_training(&mut self, training: bool) {
        for block in &mut self.blocks {
            block.set_training(training);
        }
    }
}

/// The single-pathway video stem used by the reference configurations:
/// a [kT, kH, kW] convolution at spatial stride 2 followed by BN, ReLU and
/// an optional [1, 3, 3] max pool.
pub struct ResNeXt3DStem {
    stem: ResNeXt3DStemMultiPathway,
}

impl ResNeXt3DStem {
    pub fn new(
        temporal_kernel: usize,
        spatial_kernel: usize,
        input_planes: usize,
        stem_planes: usize,
        maxpool: bool,
    ) -> Result<Self, ModelError> {
        let stem = ResNeXt3DStemMultiPathway::new(
            &[input_planes],
            &[stem_planes],
            &[(temporal_kernel, spatial_kernel, spatial_kernel)],
            &[(1, 2, 2)],
            crate::nn::batchnorm::DEFAULT_EPS,
            crate::nn::batchnorm::DEFAULT_MOMENTUM,
            &[maxpool],
        )?;
        Ok(Self { stem })
    }

    pub fn forward_pathways(
        &self,
        inputs: &[ArrayD<f32>],
    ) -> Result<Vec<ArrayD<f32>>, ModelError> {
        self.stem.forward_pathways(inputs)
    }

    pub fn init_parameters(&mut self) {
        self.stem.init_parameters();
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.stem.parameters()
    }

    pub fn set_training(&mut self, training: bool) {
        self.stem.set_training(training);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_single_pathway_with_pool() {
        let mut stem = ResNeXt3DStemSinglePathway::new(
            3,
            8,
            (3, 7, 7),
            (1, 2, 2),
            crate::nn::batchnorm::DEFAULT_EPS,
            crate::nn::batchnorm::DEFAULT_MOMENTUM,
            true,
        );
        stem.init_parameters();
        let input = ArrayD::<f32>::ones(IxDyn(&[1, 3, 4, 32, 32]));
        let output = stem.forward(&input).unwrap();
        // Conv halves the spatial extent, the pool halves it again.
        assert_eq!(output.shape(), &[1, 8, 4, 8, 8]);
    }

    #[test]
    fn test_single_pathway_without_pool() {
        let stem = ResNeXt3DStemSinglePathway::new(
            3,
            8,
            (3, 5, 5),
            (1, 2, 2),
            crate::nn::batchnorm::DEFAULT_EPS,
            crate::nn::batchnorm::DEFAULT_MOMENTUM,
            false,
        );
        let input = ArrayD::<f32>::ones(IxDyn(&[1, 3, 4, 32, 32]));
        let output = stem.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 8, 4, 16, 16]);
    }

    #[test]
    fn test_multi_pathway_validation() {
        let err = ResNeXt3DStemMultiPathway::new(
            &[3, 3],
            &[8],
            &[(3, 7, 7)],
            &[(1, 2, 2)],
            1e-5,
            0.1,
            &[true],
        );
        assert!(matches!(err, Err(ModelError::Config(_))));
    }

    #[test]
    fn test_pathway_count_check() {
        let stem = ResNeXt3DStem::new(3, 7, 3, 8, true).unwrap();
        let inputs = vec![
            ArrayD::<f32>::zeros(IxDyn(&[1, 3, 2, 16, 16])),
            ArrayD::<f32>::zeros(IxDyn(&[1, 3, 2, 16, 16])),
        ];
        let err = stem.forward_pathways(&inputs).unwrap_err();
        assert!(matches!(
            err,
            ModelError::PathwayCount {
                expected: 1,
                actual: 2
            }
        ));
    }
}
