//! End-to-end forward passes of the reference configurations on
//! full-resolution clips.

use ndarray::{ArrayD, IxDyn};
use resnext3d::models::resnext3d::{resnext3d_postact_i3d50, resnext3d_preact_i3d50};

fn sample_clip() -> ArrayD<f32> {
    // A deterministic pseudo-clip; values in roughly [-0.5, 0.5].
    ArrayD::from_shape_fn(IxDyn(&[1, 3, 8, 224, 224]), |idx| {
        let v = (idx[1] * 31 + idx[2] * 17 + idx[3] * 7 + idx[4] * 3) % 101;
        v as f32 / 101.0 - 0.5
    })
}

#[test]
fn preact_i3d50_classifies_a_clip() {
    let mut model = resnext3d_preact_i3d50(None).unwrap();
    model.eval();

    let output = model.forward(&sample_clip()).unwrap();
    assert_eq!(output.shape(), &[1, 400]);

    // Inference output is a distribution over classes.
    let sum: f32 = output.row(0).sum();
    assert!((sum - 1.0).abs() < 1e-3);
    assert!(output.iter().all(|&v| (0.0..=1.0).contains(&v)));
}

#[test]
fn postact_i3d50_classifies_a_clip() {
    let mut model = resnext3d_postact_i3d50(None).unwrap();
    model.eval();

    let output = model.forward(&sample_clip()).unwrap();
    assert_eq!(output.shape(), &[1, 400]);

    let sum: f32 = output.row(0).sum();
    assert!((sum - 1.0).abs() < 1e-3);
}
