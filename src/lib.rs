//! # hbaselines - PPO policies on an ndarray training core
//!
//! Reinforcement-learning policy classes and the Proximal Policy
//! Optimization update: clipped surrogate policy loss, clipped value loss,
//! entropy bonus, gradient clipping by global norm and gradient averaging
//! across a group of workers.
//!
//! Networks are small dense MLPs with explicit backward passes. The PPO
//! loss and the action distributions provide analytic derivatives, so no
//! automatic differentiation is involved.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hbaselines::policies::Policy;
//! use hbaselines::ppo::PpoPolicyBuilder;
//! use hbaselines::spaces::Space;
//! use ndarray::array;
//!
//! let mut policy = PpoPolicyBuilder::new(Space::uniform_box(2, -1.0, 1.0), Space::discrete(3))
//!     .layers(vec![64, 64])
//!     .n_steps(128)
//!     .seed(0)
//!     .build()
//!     .unwrap();
//! policy.initialize().unwrap();
//!
//! let obs = array![[0.1, -0.3]];
//! let action = policy.get_action(obs.view(), None, true, false, 0).unwrap();
//! policy
//!     .store_transition(obs.row(0), None, &action, 1.0, obs.row(0), None, false, 0)
//!     .unwrap();
//! policy.update(true).unwrap();
//! println!("{:?}", policy.get_td_map());
//! ```
//!
//! ## Module Organization
//!
//! - [`policies`] - the `Policy` trait and shared policy parameters
//! - [`ppo`] - PPO loss, model, rollouts, policy and configuration
//! - [`distributions`] - categorical and diagonal Gaussian action heads
//! - [`spaces`] - observation, action and context spaces
//! - [`network`], [`layers`], [`activations`] - the MLP building blocks
//! - [`optimizer`] - SGD, Adam and gradient clipping
//! - [`schedules`] - learning-rate and clip-range schedules
//! - [`comm`] - gradient synchronization between workers
//! - [`metrics`] - batch statistics and explained variance
//! - [`logging`] - `tracing` subscriber setup
//! - [`error`] - error types and result handling

pub mod activations;
pub mod comm;
pub mod distributions;
pub mod error;
pub mod layers;
pub mod logging;
pub mod metrics;
pub mod network;
pub mod optimizer;
pub mod policies;
pub mod ppo;
pub mod schedules;
pub mod spaces;

pub use error::{PolicyError, Result};

#[cfg(test)]
mod tests;
