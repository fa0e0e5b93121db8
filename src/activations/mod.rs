//! # Activation Functions
//!
//! Element-wise non-linearities for the hidden layers of policy and value
//! networks, together with the derivatives used by the backward pass.
//!
//! Hidden layers default to `Tanh`; output layers are always `Linear` (the
//! policy head turns actor outputs into a distribution).

pub mod functions;

pub use functions::Activation;
