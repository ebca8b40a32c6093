//! Model architectures assembled from the [`crate::nn`] primitives.

pub mod resnext3d;
