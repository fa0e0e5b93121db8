use ndarray::{array, Array1, Array2};

use crate::optimizer::{Adam, GradientClipper, Optimizer, OptimizerWrapper, SGD};

#[test]
fn test_sgd_step() {
    let mut sgd = SGD::new();
    let mut w = array![[1.0, 2.0], [3.0, 4.0]];
    let g = array![[0.5, 0.5], [-1.0, 0.0]];
    sgd.update_weights(0, &mut w, &g, 0.1).unwrap();
    let expected = array![[0.95, 1.95], [3.1, 4.0]];
    for (a, b) in w.iter().zip(expected.iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn test_shape_mismatch_is_rejected() {
    let mut sgd = SGD::new();
    let mut b = Array1::<f32>::zeros(3);
    assert!(sgd.update_biases(0, &mut b, &Array1::zeros(2), 0.1).is_err());
}

#[test]
fn test_adam_first_step_moves_by_learning_rate() {
    // With bias correction the first update is lr * g / (|g| + eps)
    let mut adam = Adam::new(0.9, 0.999, 1e-5);
    let mut b = array![1.0, -1.0, 0.0];
    adam.begin_step();
    adam.update_biases(0, &mut b, &array![2.0, -0.5, 0.0], 0.01).unwrap();
    assert!((b[0] - 0.99).abs() < 1e-5);
    assert!((b[1] + 0.99).abs() < 1e-5);
    assert_eq!(b[2], 0.0);
    assert_eq!(adam.t, 1);
}

#[test]
fn test_adam_keeps_moments_per_slot() {
    let mut adam = Adam::new(0.9, 0.999, 1e-5);
    let mut a = Array1::<f32>::zeros(2);
    let mut b = Array1::<f32>::zeros(2);
    for _ in 0..3 {
        adam.begin_step();
        adam.update_biases(0, &mut a, &array![1.0, 1.0], 0.1).unwrap();
    }
    // A fresh slot behaves like the very first step of a new parameter
    adam.begin_step();
    adam.update_biases(1, &mut b, &array![1.0, 1.0], 0.1).unwrap();
    assert!(b.iter().all(|&v| v < 0.0));

    // Reusing a slot with a different shape is an error
    let mut w = Array2::<f32>::zeros((2, 2));
    assert!(adam.update_weights(0, &mut w, &Array2::ones((2, 2)), 0.1).is_err());
}

#[test]
fn test_wrapper_dispatches_begin_step() {
    let mut wrapper = OptimizerWrapper::Adam(Adam::default());
    wrapper.begin_step();
    wrapper.begin_step();
    match &wrapper {
        OptimizerWrapper::Adam(adam) => assert_eq!(adam.t, 2),
        OptimizerWrapper::SGD(_) => unreachable!(),
    }
}

#[test]
fn test_adam_minimises_quadratic() {
    let mut adam = Adam::new(0.9, 0.999, 1e-5);
    let mut x = array![3.0f32, -2.0];
    for _ in 0..1000 {
        let grad = &x * 2.0;
        adam.begin_step();
        adam.update_biases(0, &mut x, &grad, 0.01).unwrap();
    }
    assert!(x.iter().all(|v| v.abs() < 0.1));
}

#[test]
fn test_clipper_from_max_norm() {
    assert_eq!(
        GradientClipper::from_max_norm(Some(0.5)),
        GradientClipper::ClipByGlobalNorm { max_norm: 0.5 }
    );
    assert_eq!(GradientClipper::from_max_norm(None), GradientClipper::None);

    let mut a = array![3.0f32, 4.0].into_dyn();
    let mut views = vec![a.view_mut()];
    let norm = GradientClipper::None.clip(&mut views);
    assert_eq!(norm, 5.0);
    assert_eq!(a, array![3.0f32, 4.0].into_dyn());
}
