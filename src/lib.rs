//! # ResNeXt3D: 3D Residual Video Classification Networks in Rust
//!
//! This crate implements the **ResNeXt3D** family of video classification
//! architectures (post-activated and pre-activated variants) as eager,
//! forward-computable models on top of `ndarray`.
//!
//! The model consists of one stem, a number of residual stages and a
//! fully-convolutional classification head. Residual blocks are assembled
//! from interchangeable skip/residual transformation strategies, so the
//! same builder produces both the conventional post-activated topology and
//! the pre-activated one.
//!
//! ## Usage Example
//!
//! ```no_run
//! use resnext3d::models::resnext3d::resnext3d_postact_i3d50;
//! use ndarray::ArrayD;
//!
//! // 1. Build a ready-to-run model (weights are freshly initialized).
//! let mut model = resnext3d_postact_i3d50(None).unwrap();
//! model.eval();
//!
//! // 2. Feed a video clip of shape (batch, channel, time, height, width).
//! let clip = ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 3, 8, 224, 224]));
//! let scores = model.forward(&clip).unwrap();
//! assert_eq!(scores.dim(), (1, 400));
//! ```

// Declare public modules that constitute the core library API.
pub mod init;
pub mod models;
pub mod nn;
