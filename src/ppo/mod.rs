//! # Proximal Policy Optimization
//!
//! - [`loss`]: the clipped surrogate objective and its derivatives
//! - [`model`]: actor/critic networks and the gradient update
//! - [`rollout`]: per-environment trajectories and GAE
//! - [`policy`]: the [`Policy`](crate::policies::Policy) implementation
//! - [`config`]: hyperparameters and the builder

pub mod config;
pub mod loss;
pub mod model;
pub mod policy;
pub mod rollout;
pub mod stats;

pub use config::{PpoConfig, PpoPolicyBuilder};
pub use loss::{ppo_loss, LossCoefficients, LossInputs, LossOutput};
pub use model::{ModelGradients, ModelParams, PpoModel, StepOutput};
pub use policy::PpoPolicy;
pub use rollout::{RolloutBuffer, TrainBatch};
pub use stats::{TrainStats, LOSS_NAMES};
