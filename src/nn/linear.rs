//! Модуль, реализующий полносвязный (линейный) слой.

use crate::init;
use crate::nn::module::{LayerError, Module};
use ndarray::{Array1, Array2, ArrayD, ArrayViewD};

/// Полносвязный (линейный) слой.
///
/// Применяет формулу `y = xW + b` к последней оси входного тензора
/// произвольного ранга: вход формы `[..., in_features]` отображается в
/// выход формы `[..., out_features]`. Именно это свойство позволяет
/// классификационной голове работать «полностью свёрточно» по любому
/// количеству пространственно-временных позиций.
pub struct Linear {
    /// Тензор весов формы [in_features, out_features].
    pub weights: Array2<f32>,
    /// Тензор смещений формы [out_features].
    pub bias: Array1<f32>,
}

impl Linear {
    /// Создает новый полносвязный слой с нулевыми параметрами.
    ///
    /// Реальные значения параметров задаёт политика инициализации модели
    /// после сборки всего графа.
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            weights: Array2::zeros((in_features, out_features)),
            bias: Array1::zeros(out_features),
        }
    }

    /// Количество входных признаков.
    pub fn in_features(&self) -> usize {
        self.weights.nrows()
    }

    /// Количество выходных признаков.
    pub fn out_features(&self) -> usize {
        self.weights.ncols()
    }

    /// Инициализация весов нормальным распределением N(0, std^2),
    /// смещения - нулями. Классификационный слой инициализируется с
    /// меньшим std, чем свёрточные слои.
    pub fn init_normal(&mut self, std: f32) {
        init::normal(&mut self.weights, 0.0, std);
        init::constant(&mut self.bias, 0.0);
    }
}

impl Module for Linear {
    /// Прямой проход: `inputs.dot(weights) + bias` по последней оси.
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        let in_features = self.in_features();
        let last = *input.shape().last().ok_or(LayerError::RankMismatch {
            expected: 2,
            actual: 0,
        })?;
        if last != in_features {
            return Err(LayerError::Shape(format!(
                "Linear: input has {} features, layer expects {}",
                last, in_features
            )));
        }

        let rows = input.len() / in_features;
        let flat = input.as_standard_layout();
        let x2 = flat
            .to_shape((rows, in_features))
            .map_err(|e| LayerError::Shape(format!("Linear input: {}", e)))?;

        let mut y = x2.dot(&self.weights);
        y += &self.bias;

        let mut out_shape: Vec<usize> = input.shape().to_vec();
        *out_shape
            .last_mut()
            .expect("shape checked non-empty above") = self.out_features();
        let out = y
            .into_dyn()
            .to_shape(out_shape.as_slice())
            .map_err(|e| LayerError::Shape(format!("Linear output: {}", e)))?
            .to_owned();
        Ok(out)
    }

    /// Возвращает список обучаемых параметров слоя.
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.weights.view().into_dyn(), self.bias.view().into_dyn()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_linear_known_values() {
        let mut linear = Linear::new(2, 3);
        linear.weights = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        linear.bias = Array1::from_vec(vec![0.5, -0.5, 0.0]);

        let input = ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![1.0, 1.0]).unwrap();
        let output = linear.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 3]);
        assert!((output[[0, 0]] - 5.5).abs() < 1e-6);
        assert!((output[[0, 1]] - 6.5).abs() < 1e-6);
        assert!((output[[0, 2]] - 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_applies_to_last_axis() {
        let mut linear = Linear::new(4, 2);
        linear.init_normal(0.01);
        let input = ArrayD::<f32>::zeros(IxDyn(&[2, 3, 5, 4]));
        let output = linear.forward(&input).unwrap();
        assert_eq!(output.shape(), &[2, 3, 5, 2]);
    }

    #[test]
    fn test_linear_feature_mismatch() {
        let linear = Linear::new(4, 2);
        let input = ArrayD::<f32>::zeros(IxDyn(&[2, 3]));
        assert!(linear.forward(&input).is_err());
    }
}
