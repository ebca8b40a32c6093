//! BatchNormalization слой для пятимерных видео-тензоров.
//!
//! Реализует Batch Normalization по каналам с поддержкой train/eval режимов,
//! running statistics и обучаемых параметров gamma/beta.

use crate::init;
use crate::nn::module::{as_5d, LayerError, Module};
use ndarray::{Array1, ArrayD, ArrayViewD, Axis};

/// Малая константа для численной стабильности.
pub const DEFAULT_EPS: f32 = 1e-5;

/// Momentum для обновления running statistics.
pub const DEFAULT_MOMENTUM: f32 = 0.1;

/// Слой Batch Normalization для тензоров формы [N, C, T, H, W].
///
/// Нормализует каждый канал по осям (N, T, H, W), применяя формулу:
/// `y = gamma * (x - mean) / sqrt(var + eps) + beta`
///
/// В режиме обучения использует статистики текущего батча,
/// в режиме inference - накопленные running statistics. Обновление
/// running statistics принадлежит внешнему циклу обучения и не
/// выполняется внутри `forward`.
pub struct BatchNorm3d {
    /// Обучаемый масштаб (scale), по одному значению на канал.
    pub gamma: Array1<f32>,
    /// Обучаемый сдвиг (shift), по одному значению на канал.
    pub beta: Array1<f32>,
    /// Накопленное среднее для режима inference.
    pub running_mean: Array1<f32>,
    /// Накопленная дисперсия для режима inference.
    pub running_var: Array1<f32>,
    /// Количество нормализуемых каналов.
    pub num_features: usize,
    /// Константа epsilon для численной стабильности.
    pub eps: f32,
    /// Momentum для экспоненциального сглаживания running statistics.
    pub momentum: f32,
    /// Флаг режима обучения.
    pub training: bool,
}

impl BatchNorm3d {
    /// Создаёт новый слой BatchNorm3d для `num_features` каналов.
    pub fn new(num_features: usize) -> Self {
        Self {
            gamma: Array1::ones(num_features),
            beta: Array1::zeros(num_features),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            num_features,
            eps: DEFAULT_EPS,
            momentum: DEFAULT_MOMENTUM,
            training: true,
        }
    }

    /// Создаёт слой с указанным epsilon.
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Создаёт слой с указанным momentum.
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    /// Устанавливает режим обучения.
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Устанавливает режим inference.
    pub fn eval(&mut self) {
        self.training = false;
    }

    /// Сбрасывает параметры слоя: gamma = `gamma_value`, beta = 0,
    /// running statistics в исходное состояние (mean 0, var 1).
    ///
    /// `gamma_value` равен нулю для слоёв, помеченных политикой
    /// zero-init-residual, и единице для всех остальных.
    pub fn reset_parameters(&mut self, gamma_value: f32) {
        init::constant(&mut self.gamma, gamma_value);
        init::constant(&mut self.beta, 0.0);
        init::constant(&mut self.running_mean, 0.0);
        init::constant(&mut self.running_var, 1.0);
    }
}

impl Module for BatchNorm3d {
    /// Прямой проход BatchNorm3d.
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let x = as_5d(input)?;
        let (_, c, _, _, _) = x.dim();
        if c != self.num_features {
            return Err(LayerError::Shape(format!(
                "BatchNorm3d: input has {} channels, layer expects {}",
                c, self.num_features
            )));
        }

        let mut output = x.to_owned();
        for (ch, mut lane) in output.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, var) = if self.training {
                let len = lane.len() as f32;
                let mean = lane.sum() / len;
                let var = lane.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / len;
                (mean, var)
            } else {
                (self.running_mean[ch], self.running_var[ch])
            };

            let scale = self.gamma[ch] / (var + self.eps).sqrt();
            let shift = self.beta[ch] - mean * scale;
            lane.mapv_inplace(|v| v * scale + shift);
        }

        Ok(output.into_dyn())
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.gamma.view().into_dyn(), self.beta.view().into_dyn()]
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_batchnorm_creation() {
        let bn = BatchNorm3d::new(16).with_eps(1e-3).with_momentum(0.05);
        assert_eq!(bn.num_features, 16);
        assert_eq!(bn.eps, 1e-3);
        assert_eq!(bn.momentum, 0.05);
        assert!(bn.training);
        assert_eq!(bn.parameters().len(), 2);
    }

    #[test]
    fn test_batchnorm_train_normalizes() {
        let bn = BatchNorm3d::new(1);
        let input = ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, 2, 2]), vec![1.0, 2.0, 3.0, 4.0])
            .unwrap();
        let output = bn.forward(&input).unwrap();
        // Нулевое среднее и единичная дисперсия по каналу.
        let mean: f32 = output.sum() / 4.0;
        let var: f32 = output.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_batchnorm_eval_uses_running_stats() {
        let mut bn = BatchNorm3d::new(2);
        bn.eval();
        // Со свежими running statistics (mean 0, var 1) слой почти тождественен.
        let input = ArrayD::from_shape_vec(
            IxDyn(&[1, 2, 1, 1, 2]),
            vec![0.5, -0.5, 2.0, -2.0],
        )
        .unwrap();
        let output = bn.forward(&input).unwrap();
        for (o, i) in output.iter().zip(input.iter()) {
            assert!((o - i).abs() < 1e-4);
        }
    }

    #[test]
    fn test_batchnorm_channel_mismatch() {
        let bn = BatchNorm3d::new(3);
        let input = ArrayD::<f32>::zeros(IxDyn(&[1, 2, 1, 2, 2]));
        assert!(bn.forward(&input).is_err());
    }
}
