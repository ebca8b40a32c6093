//! Модуль, содержащий слои-активации и тождественный слой.

use crate::nn::module::{LayerError, Module};
use ndarray::{ArrayD, ArrayViewD, Axis};

// --- Слой ReLU ---

/// Слой активации ReLU (Rectified Linear Unit).
///
/// Применяет поэлементную функцию `max(0, x)`.
/// Этот слой не имеет обучаемых параметров.
pub struct ReLU;

impl ReLU {
    /// Создает новый экземпляр слоя ReLU.
    pub fn new() -> Self {
        ReLU {}
    }
}

impl Default for ReLU {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ReLU {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        Ok(input.mapv(|val| val.max(0.0)))
    }

    /// ReLU не имеет обучаемых параметров, поэтому возвращаем пустой вектор.
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        Vec::new()
    }
}

// --- Тождественный слой ---

/// Тождественный слой: возвращает вход без изменений.
///
/// Используется как skip-путь residual-блока, когда проекция не нужна.
pub struct Identity;

impl Identity {
    pub fn new() -> Self {
        Identity {}
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Identity {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        Ok(input.clone())
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        Vec::new()
    }
}

// --- Слой Softmax ---

/// Слой Softmax по последней оси тензора.
///
/// Классификационная голова применяет его к оси классов при
/// полностью свёрточном inference.
pub struct Softmax;

impl Softmax {
    pub fn new() -> Self {
        Softmax {}
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Softmax {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        if input.ndim() == 0 {
            return Err(LayerError::RankMismatch {
                expected: 1,
                actual: 0,
            });
        }
        let mut result = input.clone();
        let last_axis = Axis(result.ndim() - 1);
        for mut lane in result.lanes_mut(last_axis) {
            let max_val = lane.iter().fold(f32::NEG_INFINITY, |max, &val| max.max(val));
            lane.mapv_inplace(|x| (x - max_val).exp());
            let sum = lane.sum();
            lane.mapv_inplace(|x| x / sum);
        }
        Ok(result)
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_relu() {
        let relu = ReLU::new();
        let input =
            ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![-1.0, 2.0, 0.0, -0.5]).unwrap();
        let output = relu.forward(&input).unwrap();
        assert_eq!(output.as_slice().unwrap(), &[0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_identity() {
        let id = Identity::new();
        let input = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, -2.0, 3.0]).unwrap();
        assert_eq!(id.forward(&input).unwrap(), input);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let softmax = Softmax::new();
        let input =
            ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0]).unwrap();
        let output = softmax.forward(&input).unwrap();
        for lane in output.lanes(Axis(1)) {
            assert!((lane.sum() - 1.0).abs() < 1e-5);
        }
        // Порядок значений сохраняется.
        assert!(output[[0, 2]] > output[[0, 1]]);
        assert!(output[[0, 1]] > output[[0, 0]]);
    }
}
