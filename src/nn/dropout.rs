//! Dropout слой для регуляризации.
//!
//! Реализует стандартный Dropout, который случайно обнуляет
//! элементы тензора во время обучения для предотвращения переобучения.

use crate::nn::module::{LayerError, Module};
use ndarray::{ArrayD, ArrayViewD};
use rand::Rng;

/// Слой Dropout для регуляризации.
///
/// Во время обучения случайно обнуляет элементы с вероятностью `p`,
/// масштабируя остальные на 1/(1-p) для сохранения математического ожидания.
///
/// Во время inference (eval mode) просто пропускает вход без изменений.
///
/// # Пример
/// ```ignore
/// let mut dropout = Dropout::new(0.5); // 50% вероятность обнуления
/// dropout.eval(); // Отключить dropout для inference
/// ```
pub struct Dropout {
    /// Вероятность обнуления (0.0 - 1.0)
    pub p: f32,
    /// Флаг режима обучения
    pub training: bool,
}

impl Dropout {
    /// Создаёт новый слой Dropout.
    ///
    /// # Аргументы
    /// * `p` - Вероятность обнуления элемента (рекомендуется 0.1-0.5)
    ///
    /// # Panics
    /// Паникует если `p` не в диапазоне [0, 1)
    pub fn new(p: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&p),
            "Dropout probability must be in [0, 1), got {}",
            p
        );
        Self { p, training: true }
    }

    /// Устанавливает режим обучения.
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Устанавливает режим inference.
    pub fn eval(&mut self) {
        self.training = false;
    }

    /// Проверяет, включен ли dropout.
    pub fn is_training(&self) -> bool {
        self.training
    }
}

impl Default for Dropout {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Module for Dropout {
    /// Прямой проход Dropout.
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError> {
        if !self.training || self.p == 0.0 {
            return Ok(input.clone());
        }
        let mut rng = rand::thread_rng();
        let scale = 1.0 / (1.0 - self.p);
        Ok(input.mapv(|v| {
            if rng.gen::<f32>() < self.p {
                0.0
            } else {
                v * scale
            }
        }))
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        // Dropout не имеет обучаемых параметров
        Vec::new()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
