//! Policy interface shared by the algorithms.

pub mod base;

pub use base::{get_ob_dim, get_obs, Policy, PolicyParams, TdMap};
