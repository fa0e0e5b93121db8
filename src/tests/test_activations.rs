use ndarray::{array, Array2};
use crate::activations::Activation;

fn all_activations() -> Vec<Activation> {
    vec![
        Activation::Relu,
        Activation::Tanh,
        Activation::Sigmoid,
        Activation::Linear,
        Activation::LeakyRelu { alpha: 0.01 },
        Activation::Elu { alpha: 1.0 },
    ]
}

#[test]
fn test_activations_stay_finite_on_extreme_inputs() {
    for activation in all_activations() {
        if activation == Activation::Linear {
            continue;
        }
        let mut x = array![[1e10, -1e10, 0.0, -0.0]];
        activation.apply_batch(&mut x);
        for &val in x.iter() {
            assert!(val.is_finite(), "Activation {:?} produced non-finite value", activation);
        }
    }
}

#[test]
fn test_derivatives_match_finite_difference() {
    let x = array![[-1.5, -0.3, 0.4, 2.0]];
    let eps = 1e-3;
    for activation in all_activations() {
        let analytic = activation.derivative_batch(x.view());
        let mut plus = &x + eps;
        let mut minus = &x - eps;
        activation.apply_batch(&mut plus);
        activation.apply_batch(&mut minus);
        let numeric: Array2<f32> = (plus - minus) / (2.0 * eps);
        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert!((a - n).abs() < 1e-2, "{:?}: {} vs {}", activation, a, n);
        }
    }
}

#[test]
fn test_default_is_tanh() {
    assert_eq!(Activation::default(), Activation::Tanh);
}
