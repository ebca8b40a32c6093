//! # Neural Network Layers Module
//!
//! This module contains the tensor primitives the video architectures are
//! assembled from. Each layer computes eagerly on `ndarray` tensors of
//! dynamic rank; spatiotemporal layers expect the [N, C, T, H, W] layout.
//!
//! ## Available Layers
//!
//! ### Core Layers
//! - [`Conv3d`]: grouped 3D convolution with configurable stride and padding
//! - [`Linear`]: fully connected / dense layer applied over the last axis
//!
//! ### Normalization
//! - [`BatchNorm3d`]: per-channel batch normalization with train/eval modes
//!
//! ### Activations
//! - [`ReLU`], [`Softmax`], [`Identity`]
//!
//! ### Pooling
//! - [`MaxPool3d`], [`AvgPool3d`], [`AdaptiveAvgPool3d`]
//!
//! ### Regularization
//! - [`Dropout`]

// Declare all submodules
pub mod activations;
pub mod batchnorm;
pub mod conv;
pub mod dropout;
pub mod linear;
pub mod module;
pub mod pooling;

// Re-export structures for convenience

// Activations
pub use activations::{Identity, ReLU, Softmax};

// Convolutional layers
pub use conv::{Conv3d, Conv3dConfig};

// Pooling layers
pub use pooling::{AdaptiveAvgPool3d, AvgPool3d, MaxPool3d};

// Other layers
pub use batchnorm::BatchNorm3d;
pub use dropout::Dropout;
pub use linear::Linear;

// Base trait and errors
pub use module::{LayerError, Module};
