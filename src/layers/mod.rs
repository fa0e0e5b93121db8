pub mod dense;
pub mod initialization;
pub mod layer_norm;

pub use dense::{DenseLayer, LayerGradients};
pub use initialization::WeightInit;
pub use layer_norm::LayerNorm;
