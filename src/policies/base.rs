use std::collections::BTreeMap;

use ndarray::{concatenate, Array1, ArrayD, ArrayView2, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::distributions::ActionBatch;
use crate::error::{PolicyError, Result};
use crate::spaces::Space;

fn default_layers() -> Vec<usize> {
    vec![64, 64]
}

/// Parameters shared by every policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyParams {
    /// Observation space of the environment
    pub ob_space: Space,
    /// Action space of the environment
    pub ac_space: Space,
    /// Context space, if the environment provides a contextual term
    #[serde(default)]
    pub co_space: Option<Space>,
    /// 0: warnings only, 1: training information, 2: per-step debug output
    #[serde(default)]
    pub verbose: u8,
    /// Enable layer normalisation on hidden layers
    #[serde(default)]
    pub layer_norm: bool,
    /// Hidden layer sizes
    #[serde(default = "default_layers")]
    pub layers: Vec<usize>,
    /// Hidden layer activation
    #[serde(default)]
    pub act_fun: Activation,
    /// Huber instead of squared error for the critic loss
    #[serde(default)]
    pub use_huber: bool,
}

impl PolicyParams {
    pub fn new(ob_space: Space, ac_space: Space) -> Self {
        PolicyParams {
            ob_space,
            ac_space,
            co_space: None,
            verbose: 0,
            layer_norm: false,
            layers: default_layers(),
            act_fun: Activation::default(),
            use_huber: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.ob_space.validate()?;
        self.ac_space.validate()?;
        if self.ob_space.is_discrete() {
            return Err(PolicyError::invalid_parameter(
                "ob_space",
                "observations must come from a box space",
            ));
        }
        if let Some(co_space) = &self.co_space {
            co_space.validate()?;
        }
        if self.layers.iter().any(|&size| size == 0) {
            return Err(PolicyError::invalid_parameter("layers", "hidden layers cannot be empty"));
        }
        Ok(())
    }

    /// Input width of the networks
    pub fn ob_dim(&self) -> usize {
        get_ob_dim(&self.ob_space, self.co_space.as_ref())
    }
}

/// Summary values of the latest update, keyed by name.
pub type TdMap = BTreeMap<String, f32>;

/// Interface between an RL algorithm and a policy.
pub trait Policy {
    /// Called once by the algorithm after the parameters exist
    fn initialize(&mut self) -> Result<()>;

    /// Perform a gradient update. With `update_actor == false` only the
    /// critic is trained.
    fn update(&mut self, update_actor: bool) -> Result<()>;

    /// Compute actions for a batch of observations from environment
    /// `env_num`.
    ///
    /// `random_actions` samples uniformly from the action space for
    /// exploration. Otherwise `apply_noise` samples from the policy and the
    /// most likely action is returned when it is off.
    fn get_action(
        &mut self,
        obs: ArrayView2<f32>,
        context: Option<ArrayView2<f32>>,
        apply_noise: bool,
        random_actions: bool,
        env_num: usize,
    ) -> Result<ActionBatch>;

    /// Summary map of the latest update
    fn get_td_map(&self) -> TdMap;
}

/// Append the contextual term to the observation.
///
/// With `axis == 0` the context is flattened and appended to a single
/// observation vector; with `axis == 1` batches are joined column-wise.
/// Without a context the observation is returned unchanged.
pub fn get_obs(obs: ArrayViewD<f32>, context: Option<ArrayViewD<f32>>, axis: usize) -> Result<ArrayD<f32>> {
    let context = match context {
        None => return Ok(obs.to_owned()),
        Some(context) => context,
    };
    if axis >= obs.ndim() {
        return Err(PolicyError::invalid_parameter(
            "axis",
            format!("axis {} out of range for a {}-d observation", axis, obs.ndim()),
        ));
    }
    let context = if axis == 0 {
        Array1::from_iter(context.iter().copied()).into_dyn()
    } else {
        context.to_owned()
    };
    concatenate(Axis(axis), &[obs.view(), context.view()])
        .map_err(|e| PolicyError::dimension_mismatch(format!("{:?}", obs.shape()), e.to_string()))
}

/// Observation dimension, including the context when there is one
pub fn get_ob_dim(ob_space: &Space, co_space: Option<&Space>) -> usize {
    ob_space.shape() + co_space.map_or(0, Space::shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_get_obs_without_context() {
        let obs = array![1.0, 2.0].into_dyn();
        assert_eq!(get_obs(obs.view(), None, 0).unwrap(), obs);
    }

    #[test]
    fn test_get_obs_flattens_context_on_axis_zero() {
        let obs = array![1.0, 2.0].into_dyn();
        let context = array![[3.0], [4.0]].into_dyn();
        let out = get_obs(obs.view(), Some(context.view()), 0).unwrap();
        assert_eq!(out, array![1.0, 2.0, 3.0, 4.0].into_dyn());
    }

    #[test]
    fn test_get_obs_batches_on_axis_one() {
        let obs = Array2::<f32>::zeros((2, 3)).into_dyn();
        let context = array![[1.0], [2.0]].into_dyn();
        let out = get_obs(obs.view(), Some(context.view()), 1).unwrap();
        assert_eq!(out.shape(), &[2, 4]);
        assert_eq!(out[[1, 3]], 2.0);

        let bad = array![[1.0], [2.0], [3.0]].into_dyn();
        assert!(get_obs(obs.view(), Some(bad.view()), 1).is_err());
    }

    #[test]
    fn test_get_ob_dim() {
        let ob = Space::uniform_box(5, -1.0, 1.0);
        let co = Space::uniform_box(2, 0.0, 1.0);
        assert_eq!(get_ob_dim(&ob, None), 5);
        assert_eq!(get_ob_dim(&ob, Some(&co)), 7);
    }

    #[test]
    fn test_params_from_json_use_defaults() {
        let json = r#"{
            "ob_space": {"Box": {"low": {"v": 1, "dim": [2], "data": [-1.0, -1.0]},
                                 "high": {"v": 1, "dim": [2], "data": [1.0, 1.0]}}},
            "ac_space": {"Discrete": {"n": 3}}
        }"#;
        let params: PolicyParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.layers, vec![64, 64]);
        assert_eq!(params.act_fun, Activation::Tanh);
        assert!(params.validate().is_ok());
        assert_eq!(params.ob_dim(), 2);
    }

    #[test]
    fn test_discrete_observations_rejected() {
        let params = PolicyParams::new(Space::discrete(2), Space::discrete(2));
        assert!(params.validate().is_err());
    }
}
