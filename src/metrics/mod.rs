pub mod statistics;

pub use statistics::{count_non_finite, explained_variance, normalize, Statistics};
