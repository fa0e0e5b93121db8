use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::model::ModelParams;
use super::policy::PpoPolicy;
use crate::activations::Activation;
use crate::comm::Communicator;
use crate::error::{PolicyError, Result};
use crate::policies::PolicyParams;
use crate::schedules::Schedule;
use crate::spaces::Space;

/// PPO hyperparameters.
///
/// Every field has a default, so a JSON document only needs the values it
/// changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    /// Learning rate as a function of update progress
    pub learning_rate: Schedule,
    /// Clip range of the probability ratio and the value update
    pub cliprange: Schedule,
    /// Number of parallel environments feeding the policy
    pub n_envs: usize,
    /// Steps stored per environment before an update
    pub n_steps: usize,
    /// Minibatches per optimization epoch
    pub n_minibatches: usize,
    /// Passes over the stored samples per update
    pub n_opt_epochs: usize,
    /// Discount factor
    pub gamma: f32,
    /// GAE lambda
    pub lam: f32,
    pub ent_coef: f32,
    pub vf_coef: f32,
    pub max_grad_norm: Option<f32>,
    pub microbatch_size: Option<usize>,
    pub mpi_rank_weight: f32,
    /// Planned number of updates, the horizon of the schedules. Without it
    /// schedules stay at their initial value.
    pub total_updates: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for PpoConfig {
    fn default() -> Self {
        PpoConfig {
            learning_rate: Schedule::constant(3e-4),
            cliprange: Schedule::constant(0.2),
            n_envs: 1,
            n_steps: 128,
            n_minibatches: 4,
            n_opt_epochs: 4,
            gamma: 0.99,
            lam: 0.95,
            ent_coef: 0.01,
            vf_coef: 0.5,
            max_grad_norm: Some(0.5),
            microbatch_size: None,
            mpi_rank_weight: 1.0,
            total_updates: None,
            seed: None,
        }
    }
}

impl PpoConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PpoConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Samples collected between updates
    pub fn nbatch(&self) -> usize {
        self.n_envs * self.n_steps
    }

    /// Samples per minibatch
    pub fn nbatch_train(&self) -> usize {
        self.nbatch() / self.n_minibatches.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_envs == 0 || self.n_steps == 0 || self.n_minibatches == 0 || self.n_opt_epochs == 0 {
            return Err(PolicyError::invalid_parameter(
                "n_envs/n_steps/n_minibatches/n_opt_epochs",
                "must all be positive",
            ));
        }
        if self.nbatch() % self.n_minibatches != 0 {
            return Err(PolicyError::invalid_parameter(
                "n_minibatches",
                format!("must divide n_envs * n_steps ({})", self.nbatch()),
            ));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(PolicyError::invalid_parameter("gamma", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.lam) {
            return Err(PolicyError::invalid_parameter("lam", "must be in [0, 1]"));
        }
        if self.learning_rate.min_value().is_nan() || self.learning_rate.min_value() < 0.0 {
            return Err(PolicyError::invalid_parameter("learning_rate", "must be non-negative"));
        }
        if self.cliprange.min_value().is_nan() || self.cliprange.min_value() < 0.0 {
            return Err(PolicyError::invalid_parameter("cliprange", "must be non-negative"));
        }
        self.model_params().validate()
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            nbatch_act: self.n_envs,
            nbatch_train: self.nbatch_train(),
            nsteps: self.n_steps,
            ent_coef: self.ent_coef,
            vf_coef: self.vf_coef,
            max_grad_norm: self.max_grad_norm,
            mpi_rank_weight: self.mpi_rank_weight,
            microbatch_size: self.microbatch_size,
        }
    }
}

/// Builder for [`PpoPolicy`]
pub struct PpoPolicyBuilder {
    params: PolicyParams,
    config: PpoConfig,
    comm: Option<Arc<dyn Communicator>>,
}

impl PpoPolicyBuilder {
    pub fn new(ob_space: Space, ac_space: Space) -> Self {
        PpoPolicyBuilder {
            params: PolicyParams::new(ob_space, ac_space),
            config: PpoConfig::default(),
            comm: None,
        }
    }

    pub fn from_parts(params: PolicyParams, config: PpoConfig) -> Self {
        PpoPolicyBuilder {
            params,
            config,
            comm: None,
        }
    }

    pub fn co_space(mut self, co_space: Space) -> Self {
        self.params.co_space = Some(co_space);
        self
    }

    pub fn verbose(mut self, verbose: u8) -> Self {
        self.params.verbose = verbose;
        self
    }

    pub fn layers(mut self, layers: Vec<usize>) -> Self {
        self.params.layers = layers;
        self
    }

    pub fn act_fun(mut self, act_fun: Activation) -> Self {
        self.params.act_fun = act_fun;
        self
    }

    pub fn layer_norm(mut self, layer_norm: bool) -> Self {
        self.params.layer_norm = layer_norm;
        self
    }

    pub fn use_huber(mut self, use_huber: bool) -> Self {
        self.params.use_huber = use_huber;
        self
    }

    pub fn config(mut self, config: PpoConfig) -> Self {
        self.config = config;
        self
    }

    pub fn learning_rate(mut self, schedule: Schedule) -> Self {
        self.config.learning_rate = schedule;
        self
    }

    pub fn cliprange(mut self, schedule: Schedule) -> Self {
        self.config.cliprange = schedule;
        self
    }

    pub fn n_envs(mut self, n_envs: usize) -> Self {
        self.config.n_envs = n_envs;
        self
    }

    pub fn n_steps(mut self, n_steps: usize) -> Self {
        self.config.n_steps = n_steps;
        self
    }

    pub fn n_minibatches(mut self, n_minibatches: usize) -> Self {
        self.config.n_minibatches = n_minibatches;
        self
    }

    pub fn n_opt_epochs(mut self, n_opt_epochs: usize) -> Self {
        self.config.n_opt_epochs = n_opt_epochs;
        self
    }

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.config.gamma = gamma;
        self
    }

    pub fn lam(mut self, lam: f32) -> Self {
        self.config.lam = lam;
        self
    }

    pub fn ent_coef(mut self, ent_coef: f32) -> Self {
        self.config.ent_coef = ent_coef;
        self
    }

    pub fn vf_coef(mut self, vf_coef: f32) -> Self {
        self.config.vf_coef = vf_coef;
        self
    }

    pub fn max_grad_norm(mut self, max_grad_norm: Option<f32>) -> Self {
        self.config.max_grad_norm = max_grad_norm;
        self
    }

    pub fn microbatch_size(mut self, microbatch_size: Option<usize>) -> Self {
        self.config.microbatch_size = microbatch_size;
        self
    }

    pub fn mpi_rank_weight(mut self, weight: f32) -> Self {
        self.config.mpi_rank_weight = weight;
        self
    }

    pub fn total_updates(mut self, total_updates: usize) -> Self {
        self.config.total_updates = Some(total_updates);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn comm(mut self, comm: Arc<dyn Communicator>) -> Self {
        self.comm = Some(comm);
        self
    }

    pub fn build(self) -> Result<PpoPolicy> {
        self.config.validate()?;
        PpoPolicy::new(self.params, self.config, self.comm)
    }
}
