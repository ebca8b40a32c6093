//! Module defining the core `Module` trait for all neural network layers.

use ndarray::{ArrayD, ArrayView5, ArrayViewD, Ix5};
use thiserror::Error;

/// Errors that can occur during a layer forward pass.
///
/// Any error of this kind is a structural defect in the way the network was
/// assembled or fed, not a recoverable runtime condition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("Tensor rank mismatch: expected a {expected}-d tensor, got {actual}-d.")]
    RankMismatch { expected: usize, actual: usize },

    #[error("Tensor shape error: {0}")]
    Shape(String),
}

/// Trait defining the common interface for all layers/modules.
///
/// A `Module` maps an input tensor to an output tensor. Layers that behave
/// differently between training and inference (batch normalization, dropout,
/// the classification head) carry a `training` flag which is propagated
/// structurally via [`Module::set_training`].
pub trait Module {
    /// Performs an eager forward pass.
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, LayerError>;

    /// Returns views of all trainable parameters that belong to this module.
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>>;

    /// Switches the module (and all of its sub-modules) between training
    /// and inference mode. Stateless layers ignore this.
    fn set_training(&mut self, _training: bool) {}
}

/// Interprets a dynamic-rank tensor as the 5-d (N, C, T, H, W) video layout
/// shared by every spatiotemporal layer in this crate.
pub(crate) fn as_5d(input: &ArrayD<f32>) -> Result<ArrayView5<'_, f32>, LayerError> {
    input
        .view()
        .into_dimensionality::<Ix5>()
        .map_err(|_| LayerError::RankMismatch {
            expected: 5,
            actual: input.ndim(),
        })
}
