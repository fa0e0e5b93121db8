// Cross-module tests
pub mod test_activations;
pub mod test_optimizer;
