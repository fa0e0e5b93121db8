use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Ix2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use super::config::PpoConfig;
use super::model::PpoModel;
use super::rollout::{stack_rows, RolloutBuffer, TrainBatch};
use super::stats::TrainStats;
use crate::comm::Communicator;
use crate::distributions::ActionBatch;
use crate::error::{PolicyError, Result};
use crate::metrics::explained_variance;
use crate::policies::{get_obs, Policy, PolicyParams, TdMap};
use crate::spaces::Space;

/// What `get_action` computed for an environment, reused by
/// `store_transition`.
#[derive(Clone, Debug)]
struct PendingStep {
    actions: ActionBatch,
    values: Array1<f32>,
    neglogpacs: Array1<f32>,
}

/// On-policy PPO policy: collects transitions per environment and trains
/// the model on them in `update`.
///
/// Workers sharing a communicator must call `update` together, each with
/// the same number of stored samples and the same optimisation settings.
#[derive(Debug)]
pub struct PpoPolicy {
    params: PolicyParams,
    config: PpoConfig,
    model: PpoModel,
    buffers: Vec<RolloutBuffer>,
    pending: Vec<Option<PendingStep>>,
    rng: StdRng,
    num_updates: usize,
    td_map: TdMap,
}

impl PpoPolicy {
    pub fn new(params: PolicyParams, config: PpoConfig, comm: Option<Arc<dyn Communicator>>) -> Result<Self> {
        params.validate()?;
        config.validate()?;

        let (model_rng, rng) = match config.seed {
            Some(seed) => (StdRng::seed_from_u64(seed), StdRng::seed_from_u64(seed.wrapping_add(1))),
            None => (StdRng::from_entropy(), StdRng::from_entropy()),
        };
        let model = PpoModel::new(&params, config.model_params(), comm, model_rng)?;

        Ok(PpoPolicy {
            buffers: vec![RolloutBuffer::new(); config.n_envs],
            pending: vec![None; config.n_envs],
            params,
            config,
            model,
            rng,
            num_updates: 0,
            td_map: TdMap::new(),
        })
    }

    pub fn model(&self) -> &PpoModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut PpoModel {
        &mut self.model
    }

    pub fn params(&self) -> &PolicyParams {
        &self.params
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    pub fn num_updates(&self) -> usize {
        self.num_updates
    }

    /// Transitions stored since the last update, over all environments
    pub fn num_stored(&self) -> usize {
        self.buffers.iter().map(RolloutBuffer::len).sum()
    }

    pub fn buffer(&self, env_num: usize) -> Option<&RolloutBuffer> {
        self.buffers.get(env_num)
    }

    /// Learning rate and clip range for the next update
    pub fn current_hyperparameters(&self) -> (f32, f32) {
        let total = self.config.total_updates.unwrap_or(0);
        (
            self.config.learning_rate.value_at(self.num_updates, total),
            self.config.cliprange.value_at(self.num_updates, total),
        )
    }

    fn ensure_env(&mut self, env_num: usize) {
        if env_num >= self.buffers.len() {
            self.buffers.resize_with(env_num + 1, RolloutBuffer::new);
            self.pending.resize(env_num + 1, None);
        }
    }

    fn processed_batch(&self, obs: ArrayView2<f32>, context: Option<ArrayView2<f32>>) -> Result<Array2<f32>> {
        self.check_context(context.is_some())?;
        let obs = get_obs(obs.into_dyn(), context.map(|c| c.into_dyn()), 1)?;
        obs.into_dimensionality::<Ix2>()
            .map_err(|e| PolicyError::dimension_mismatch("2-d observation batch", e.to_string()))
    }

    fn processed_single(&self, obs: ArrayView1<f32>, context: Option<ArrayView1<f32>>) -> Result<Array1<f32>> {
        self.check_context(context.is_some())?;
        let obs = get_obs(obs.into_dyn(), context.map(|c| c.into_dyn()), 0)?;
        let obs = Array1::from_iter(obs.iter().copied());
        if obs.len() != self.model.ob_dim() {
            return Err(PolicyError::dimension_mismatch(
                format!("{} observation entries", self.model.ob_dim()),
                format!("{}", obs.len()),
            ));
        }
        Ok(obs)
    }

    fn check_context(&self, has_context: bool) -> Result<()> {
        match (self.params.co_space.is_some(), has_context) {
            (true, false) => Err(PolicyError::invalid_parameter("context", "the policy expects a context")),
            (false, true) => Err(PolicyError::invalid_parameter("context", "the policy has no context space")),
            _ => Ok(()),
        }
    }

    fn random_actions(&mut self, n: usize) -> Result<ActionBatch> {
        match &self.params.ac_space {
            space @ Space::Discrete { .. } => {
                let actions = (0..n)
                    .map(|_| space.sample_discrete(&mut self.rng))
                    .collect::<Result<Vec<usize>>>()?;
                Ok(ActionBatch::Discrete(actions))
            }
            space @ Space::Box { .. } => {
                let rows = (0..n)
                    .map(|_| space.sample_box(&mut self.rng))
                    .collect::<Result<Vec<Array1<f32>>>>()?;
                let views: Vec<ArrayView1<f32>> = rows.iter().map(|r| r.view()).collect();
                Ok(ActionBatch::Continuous(stack_rows(&views)?))
            }
        }
    }

    /// Record one transition of environment `env_num`.
    ///
    /// The value and negative log-probability come from the preceding
    /// `get_action` call when it produced this action, and are recomputed
    /// otherwise.
    #[allow(clippy::too_many_arguments)]
    pub fn store_transition(
        &mut self,
        obs0: ArrayView1<f32>,
        context0: Option<ArrayView1<f32>>,
        action: &ActionBatch,
        reward: f32,
        obs1: ArrayView1<f32>,
        context1: Option<ArrayView1<f32>>,
        done: bool,
        env_num: usize,
    ) -> Result<()> {
        if action.len() != 1 {
            return Err(PolicyError::dimension_mismatch("1 action", action.len().to_string()));
        }
        if let ActionBatch::Discrete(a) = action {
            self.params.ac_space.check_discrete_action(a[0])?;
        }
        let obs0 = self.processed_single(obs0, context0)?;
        let obs1 = self.processed_single(obs1, context1)?;
        self.ensure_env(env_num);

        let cached = self.pending[env_num]
            .take()
            .filter(|p| p.actions.len() == 1 && &p.actions == action);
        let (value, neglogp) = match cached {
            Some(p) => (p.values[0], p.neglogpacs[0]),
            None => {
                let obs = obs0.view().insert_axis(ndarray::Axis(0));
                let (values, neglogpacs) = self.model.evaluate(obs, action)?;
                (values[0], neglogpacs[0])
            }
        };

        self.buffers[env_num].add(obs0, action.clone(), reward, value, neglogp, done, obs1);
        Ok(())
    }

    /// Every worker runs the same number of gradient steps per update, so
    /// the group must hold equally many samples. One all-reduce tells every
    /// rank each member's sample count and whether it built a batch at all.
    fn check_group_batch(&self, local: Result<TrainBatch>) -> Result<TrainBatch> {
        let comm = self.model.comm();
        let size = comm.size();
        if size == 1 {
            return local;
        }
        // slot r: rank r's sample count, slot size + r: rank r failed
        let mut slots = vec![0.0f32; 2 * size];
        match &local {
            Ok(batch) => slots[comm.rank()] = batch.len() as f32,
            Err(_) => slots[size + comm.rank()] = 1.0,
        }
        comm.all_reduce_sum(&mut slots)?;

        let batch = local?;
        let failed = slots[size..].iter().filter(|&&f| f > 0.0).count();
        if failed > 0 {
            return Err(PolicyError::TrainingError(format!(
                "{} of {} workers could not build a training batch",
                failed, size
            )));
        }
        let counts = &slots[..size];
        if counts.iter().any(|&c| c != counts[0]) {
            return Err(PolicyError::TrainingError(format!(
                "workers hold different sample counts {:?}",
                counts
            )));
        }
        Ok(batch)
    }

    fn finish_rollouts(&mut self) -> Result<()> {
        let (gamma, lam) = (self.config.gamma, self.config.lam);
        for buffer in self.buffers.iter_mut().filter(|b| !b.is_empty()) {
            let last_value = match (&buffer.last_obs, buffer.ends_with_done()) {
                (Some(last_obs), false) => {
                    let obs = last_obs.view().insert_axis(ndarray::Axis(0));
                    self.model.value(obs)?[0]
                }
                _ => 0.0,
            };
            buffer.compute_gae(last_value, gamma, lam);
        }
        Ok(())
    }

    /// Persist the model's trainable variables
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.model.save(path)
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.model.load(path)
    }
}

impl Policy for PpoPolicy {
    fn initialize(&mut self) -> Result<()> {
        self.model.sync_from_root()
    }

    fn update(&mut self, update_actor: bool) -> Result<()> {
        let local = self.finish_rollouts().and_then(|()| TrainBatch::from_buffers(&self.buffers));
        let batch = self.check_group_batch(local)?;
        let (lr, clip_range) = self.current_hyperparameters();

        let n = batch.len();
        let minibatch_size = ((n + self.config.n_minibatches - 1) / self.config.n_minibatches).max(1);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut all_stats = Vec::with_capacity(self.config.n_opt_epochs * self.config.n_minibatches);
        for _ in 0..self.config.n_opt_epochs {
            indices.shuffle(&mut self.rng);
            for chunk in indices.chunks(minibatch_size) {
                all_stats.push(self.model.train(lr, clip_range, &batch.select(chunk), update_actor)?);
            }
        }

        let stats = TrainStats::average(&all_stats);
        let explained_var = explained_variance(batch.values.view(), batch.returns.view());
        if explained_var.is_nan() {
            warn!("returns have no variance, explained variance is undefined");
        }

        let mut td_map = stats.as_map();
        td_map.insert("learning_rate".to_string(), lr);
        td_map.insert("clip_range".to_string(), clip_range);
        td_map.insert("explained_variance".to_string(), explained_var);
        self.td_map = td_map;

        if self.params.verbose >= 1 {
            info!(
                update = self.num_updates,
                samples = n,
                policy_loss = stats.policy_loss,
                value_loss = stats.value_loss,
                policy_entropy = stats.policy_entropy,
                approxkl = stats.approxkl,
                clipfrac = stats.clipfrac,
                explained_variance = explained_var,
                lr,
                clip_range,
                "ppo update"
            );
        }

        for buffer in &mut self.buffers {
            buffer.clear();
        }
        self.pending.iter_mut().for_each(|p| *p = None);
        self.num_updates += 1;
        Ok(())
    }

    fn get_action(
        &mut self,
        obs: ArrayView2<f32>,
        context: Option<ArrayView2<f32>>,
        apply_noise: bool,
        random_actions: bool,
        env_num: usize,
    ) -> Result<ActionBatch> {
        let obs = self.processed_batch(obs, context)?;
        self.ensure_env(env_num);

        let step = if random_actions {
            let actions = self.random_actions(obs.nrows())?;
            let (values, neglogpacs) = self.model.evaluate(obs.view(), &actions)?;
            PendingStep {
                actions,
                values,
                neglogpacs,
            }
        } else {
            let out = self.model.step(obs.view(), !apply_noise)?;
            PendingStep {
                actions: out.actions,
                values: out.values,
                neglogpacs: out.neglogpacs,
            }
        };

        let actions = step.actions.clone();
        self.pending[env_num] = Some(step);
        Ok(actions)
    }

    fn get_td_map(&self) -> TdMap {
        self.td_map.clone()
    }
}
