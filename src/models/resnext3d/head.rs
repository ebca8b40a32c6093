//! Fully convolutional classification head.

use crate::nn::module::{as_5d, LayerError, Module};
use crate::nn::{AdaptiveAvgPool3d, AvgPool3d, Dropout, Linear, Softmax};
use ndarray::{Array2, ArrayD, ArrayViewD, Axis};

/// Linear projection applied fully convolutionally.
///
/// The input is permuted from [N, C, T, H, W] to [N, T, H, W, C] so the
/// projection applies along channels at every spatiotemporal position.
/// In training mode the raw activations are flattened to [N, T*H*W*classes];
/// in inference mode softmax is taken over classes and the probabilities are
/// averaged over all positions, yielding [N, classes] regardless of how many
/// positions the pooled feature map retained.
pub struct FullyConvolutionalLinear {
    pub projection: Linear,
    softmax: Softmax,
    training: bool,
}

impl FullyConvolutionalLinear {
    pub fn new(dim_in: usize, num_classes: usize) -> Self {
        Self {
            projection: Linear::new(dim_in, num_classes),
            softmax: Softmax::new(),
            training: true,
        }
    }

    pub fn init_parameters(&mut self) {
        self.projection.init_normal(0.01);
    }

    pub fn forward(&self, input: &ArrayD<f32>) -> Result<Array2<f32>, LayerError> {
        let x = as_5d(input)?;
        let n = x.dim().0;

        // [N, C, T, H, W] -> [N, T, H, W, C], channels last for the
        // per-position projection.
        let x = x.permuted_axes([0, 2, 3, 4, 1]).to_owned().into_dyn();
        let x = self.projection.forward(&x)?;

        if self.training {
            let cols = x.len() / n;
            let flat = x.as_standard_layout();
            let out = flat
                .to_shape((n, cols))
                .map_err(|e| LayerError::Shape(format!("head flatten: {}", e)))?
                .to_owned();
            return Ok(out);
        }

        // Inference: probabilities per position, averaged over T, H, W.
        let mut x = self.softmax.forward(&x)?;
        for _ in 0..3 {
            x = x.mean_axis(Axis(1)).ok_or_else(|| {
                LayerError::Shape("head: cannot average over an empty axis".to_string())
            })?;
        }
        x.into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| LayerError::Shape(format!("head output: {}", e)))
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.projection.parameters()
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

enum HeadPool {
    /// Fixed window average pool at stride 1.
    Fixed(AvgPool3d),
    /// Global spatiotemporal average pool, used when no pool size is
    /// configured.
    Adaptive(AdaptiveAvgPool3d),
}

/// Classification head: average pool, optional dropout, fully convolutional
/// linear projection.
pub struct FullyConvolutionalLinearHead {
    pool: HeadPool,
    dropout: Option<Dropout>,
    pub head_fcl: FullyConvolutionalLinear,
}

impl FullyConvolutionalLinearHead {
    /// `pool_size` is the fixed average-pool window [T, H, W]; `None`
    /// selects global adaptive pooling to a single position.
    pub fn new(
        num_classes: usize,
        in_plane: usize,
        pool_size: Option<(usize, usize, usize)>,
        use_dropout: bool,
        dropout_ratio: f32,
    ) -> Self {
        let pool = match pool_size {
            Some(size) => HeadPool::Fixed(AvgPool3d::new(size, (1, 1, 1))),
            None => HeadPool::Adaptive(AdaptiveAvgPool3d::global()),
        };
        let dropout = use_dropout.then(|| Dropout::new(dropout_ratio));
        Self {
            pool,
            dropout,
            head_fcl: FullyConvolutionalLinear::new(in_plane, num_classes),
        }
    }

    pub fn init_parameters(&mut self) {
        self.head_fcl.init_parameters();
    }

    pub fn forward(&self, input: &ArrayD<f32>) -> Result<Array2<f32>, LayerError> {
        let x = match &self.pool {
            HeadPool::Fixed(pool) => pool.forward(input)?,
            HeadPool::Adaptive(pool) => pool.forward(input)?,
        };
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(&x)?,
            None => x,
        };
        self.head_fcl.forward(&x)
    }

    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.head_fcl.parameters()
    }

    pub fn set_training(&mut self, training: bool) {
        if let Some(dropout) = &mut self.dropout {
            dropout.set_training(training);
        }
        self.head_fcl.set_training(training);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_train_output_flattens_positions() {
        let mut head = FullyConvolutionalLinearHead::new(10, 4, Some((1, 1, 1)), false, 0.5);
        head.init_parameters();
        let input = ArrayD::<f32>::ones(IxDyn(&[2, 4, 2, 3, 3]));
        // The (1, 1, 1) pool at stride 1 keeps 2*3*3 positions.
        let output = head.forward(&input).unwrap();
        assert_eq!(output.shape(), &[2, 2 * 3 * 3 * 10]);
    }

    #[test]
    fn test_eval_output_is_class_distribution() {
        let mut head = FullyConvolutionalLinearHead::new(10, 4, Some((1, 1, 1)), false, 0.5);
        head.init_parameters();
        head.set_training(false);
        let input = ArrayD::<f32>::ones(IxDyn(&[2, 4, 2, 3, 3]));
        let output = head.forward(&input).unwrap();
        assert_eq!(output.shape(), &[2, 10]);
        for row in output.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_train_eval_agree_for_single_position() {
        // With global pooling there is exactly one position, so training
        // logits and inference probabilities rank the classes identically.
        let mut head = FullyConvolutionalLinearHead::new(5, 3, None, false, 0.5);
        head.init_parameters();
        let input = ArrayD::from_shape_fn(IxDyn(&[1, 3, 2, 4, 4]), |idx| {
            idx[1] as f32 * 0.5 - idx[3] as f32 * 0.1
        });

        let logits = head.forward(&input).unwrap();
        head.set_training(false);
        let probs = head.forward(&input).unwrap();
        assert_eq!(logits.shape(), &[1, 5]);
        assert_eq!(probs.shape(), &[1, 5]);

        let argmax = |row: ndarray::ArrayView1<'_, f32>| {
            row.iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(i, _)| i)
                .unwrap()
        };
        assert_eq!(argmax(logits.row(0)), argmax(probs.row(0)));
    }

    #[test]
    fn test_adaptive_pool_accepts_any_input_size() {
        let mut head = FullyConvolutionalLinearHead::new(7, 2, None, true, 0.3);
        head.init_parameters();
        head.set_training(false);
        for &(t, h, w) in &[(1usize, 4usize, 4usize), (3, 7, 7), (2, 5, 9)] {
            let input = ArrayD::<f32>::ones(IxDyn(&[1, 2, t, h, w]));
            let output = head.forward(&input).unwrap();
            assert_eq!(output.shape(), &[1, 7]);
        }
    }
}
