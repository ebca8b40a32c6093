//! # ResNeXt3D video classification architectures
//!
//! Implementation of:
//! 1. The conventional post-activated 3D ResNe(X)t.
//! 2. The pre-activated 3D ResNe(X)t, where normalization and activation
//!    precede each learnable transform.
//!
//! The model consists of one stem, a number of residual stages and a
//! fully-convolutional classification head. A stage owns one block
//! sequence per pathway; multi-pathway configurations (e.g. SlowFast-style
//! models) pass a list of tensors through the stage pathwise. The
//! reference configurations exposed by [`resnext3d_preact_i3d50`] and
//! [`resnext3d_postact_i3d50`] use a single pathway.

use crate::nn::LayerError;
use thiserror::Error;

/// Errors produced while building or running a model.
///
/// Configuration errors are fatal: an architecture cannot be built from an
/// inconsistent description, and constructors reject it before allocating
/// any sub-module.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid model configuration: {0}")]
    Config(String),

    #[error("Expected {expected} pathway tensors, got {actual}.")]
    PathwayCount { expected: usize, actual: usize },

    #[error(transparent)]
    Layer(#[from] LayerError),
}

pub mod block;
pub mod head;
pub mod model;
pub mod stage;
pub mod stem;
pub mod transformation;

pub use block::ResBlock;
pub use head::{FullyConvolutionalLinear, FullyConvolutionalLinearHead};
pub use model::{
    resnext3d_postact_i3d50, resnext3d_preact_i3d50, ResNeXt3D, ResNeXt3DConfig,
    ResNeXt3DPostActI3D50Weights, ResNeXt3DPreActI3D50Weights,
};
pub use stage::{ResStage, ResStageConfig};
pub use stem::{ResNeXt3DStem, ResNeXt3DStemMultiPathway, ResNeXt3DStemSinglePathway};
pub use transformation::{
    BottleneckConfig, PostactivatedBottleneckTransformation, PostactivatedShortcutTransformation,
    PreactivatedBottleneckTransformation, PreactivatedShortcutTransformation,
    ResidualTransformation, ResidualTransformationType, SkipTransformation,
    SkipTransformationType,
};
