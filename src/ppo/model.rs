use std::fs;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::loss::{ppo_loss, LossCoefficients, LossInputs};
use super::rollout::TrainBatch;
use super::stats::TrainStats;
use crate::comm::{Communicator, SingleProcess};
use crate::distributions::{ActionBatch, PdType, ProbabilityDistribution};
use crate::error::{PolicyError, Result};
use crate::layers::LayerGradients;
use crate::metrics::{count_non_finite, normalize};
use crate::network::{NeuralNetwork, SLOTS_PER_LAYER};
use crate::optimizer::{Adam, GradientClipper, Optimizer, OptimizerWrapper};
use crate::policies::PolicyParams;

/// Adam epsilon used by the PPO trainer
pub const ADAM_EPSILON: f32 = 1e-5;

/// Added to the advantage standard deviation before dividing
pub const ADVANTAGE_EPSILON: f32 = 1e-8;

/// Orthogonal gain of the policy output layer
const POLICY_OUTPUT_GAIN: f32 = 0.01;

/// Orthogonal gain of the value output layer
const VALUE_OUTPUT_GAIN: f32 = 1.0;

/// Sizes and coefficients of the PPO update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Observations per `step` call (number of environments)
    pub nbatch_act: usize,
    /// Samples per training minibatch
    pub nbatch_train: usize,
    /// Steps per environment between updates
    pub nsteps: usize,
    pub ent_coef: f32,
    pub vf_coef: f32,
    /// Global gradient norm limit, `None` disables clipping
    pub max_grad_norm: Option<f32>,
    /// Weight of this worker's gradients in the group average
    pub mpi_rank_weight: f32,
    /// Split each minibatch into chunks of this size and average their
    /// gradients before the optimizer step
    pub microbatch_size: Option<usize>,
}

impl Default for ModelParams {
    fn default() -> Self {
        ModelParams {
            nbatch_act: 1,
            nbatch_train: 64,
            nsteps: 128,
            ent_coef: 0.01,
            vf_coef: 0.5,
            max_grad_norm: Some(0.5),
            mpi_rank_weight: 1.0,
            microbatch_size: None,
        }
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<()> {
        if self.nbatch_act == 0 || self.nbatch_train == 0 || self.nsteps == 0 {
            return Err(PolicyError::invalid_parameter(
                "nbatch_act/nbatch_train/nsteps",
                "batch sizes must be positive",
            ));
        }
        if !self.ent_coef.is_finite() || !self.vf_coef.is_finite() {
            return Err(PolicyError::invalid_parameter("ent_coef/vf_coef", "coefficients must be finite"));
        }
        if let Some(max_norm) = self.max_grad_norm {
            if max_norm.is_nan() || max_norm <= 0.0 {
                return Err(PolicyError::invalid_parameter("max_grad_norm", "must be positive"));
            }
        }
        if self.mpi_rank_weight.is_nan() || self.mpi_rank_weight < 0.0 {
            return Err(PolicyError::invalid_parameter("mpi_rank_weight", "must be non-negative"));
        }
        if let Some(size) = self.microbatch_size {
            if size == 0 || self.nbatch_train % size != 0 {
                return Err(PolicyError::invalid_parameter(
                    "microbatch_size",
                    format!("must be positive and divide nbatch_train ({})", self.nbatch_train),
                ));
            }
        }
        Ok(())
    }
}

/// Output of `PpoModel::step`.
#[derive(Clone, Debug)]
pub struct StepOutput {
    pub actions: ActionBatch,
    pub values: Array1<f32>,
    pub neglogpacs: Array1<f32>,
}

/// Gradients of every trainable variable of the model.
#[derive(Clone, Debug)]
pub struct ModelGradients {
    pub actor: Vec<LayerGradients>,
    pub log_std: Option<Array1<f32>>,
    pub critic: Vec<LayerGradients>,
}

impl ModelGradients {
    pub fn zeros_like(model: &PpoModel) -> Self {
        ModelGradients {
            actor: model.actor.zero_gradients(),
            log_std: model.log_std.as_ref().map(|s| Array1::zeros(s.len())),
            critic: model.critic.zero_gradients(),
        }
    }

    /// Every gradient array, actor first, then `log_std`, then critic
    pub fn arrays(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut out: Vec<ArrayViewD<'_, f32>> = self.actor.iter().flat_map(|g| g.arrays()).collect();
        if let Some(log_std) = &self.log_std {
            out.push(log_std.view().into_dyn());
        }
        out.extend(self.critic.iter().flat_map(|g| g.arrays()));
        out
    }

    pub fn arrays_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut out: Vec<ArrayViewMutD<'_, f32>> = self.actor.iter_mut().flat_map(|g| g.arrays_mut()).collect();
        if let Some(log_std) = &mut self.log_std {
            out.push(log_std.view_mut().into_dyn());
        }
        out.extend(self.critic.iter_mut().flat_map(|g| g.arrays_mut()));
        out
    }

    /// `self += factor * other`
    pub fn add_scaled(&mut self, other: &ModelGradients, factor: f32) -> Result<()> {
        let sources = other.arrays();
        let mut targets = self.arrays_mut();
        if sources.len() != targets.len() {
            return Err(PolicyError::dimension_mismatch(
                format!("{} gradient arrays", targets.len()),
                format!("{}", sources.len()),
            ));
        }
        for (target, source) in targets.iter_mut().zip(&sources) {
            if target.shape() != source.shape() {
                return Err(PolicyError::dimension_mismatch(
                    format!("{:?}", target.shape()),
                    format!("{:?}", source.shape()),
                ));
            }
            target.scaled_add(factor, source);
        }
        Ok(())
    }

    pub fn to_flat(&self) -> Vec<f32> {
        self.arrays().iter().flat_map(|a| a.iter().copied()).collect()
    }

    pub fn read_flat(&mut self, flat: &[f32]) -> Result<()> {
        let mut src = flat.iter();
        for mut array in self.arrays_mut() {
            for value in array.iter_mut() {
                *value = *src
                    .next()
                    .ok_or_else(|| PolicyError::TrainingError("flat gradient buffer too short".to_string()))?;
            }
        }
        Ok(())
    }

    pub fn global_norm(&self) -> f32 {
        self.arrays()
            .iter()
            .map(|a| a.iter().map(|&g| g * g).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    actor: NeuralNetwork,
    critic: NeuralNetwork,
    log_std: Option<Array1<f32>>,
}

/// Actor and critic networks trained with the clipped PPO objective.
///
/// Optimizer slots: the actor layers come first, then `log_std`, then the
/// critic layers.
pub struct PpoModel {
    actor: NeuralNetwork,
    critic: NeuralNetwork,
    /// State-independent log standard deviation of Gaussian policies
    log_std: Option<Array1<f32>>,
    pdtype: PdType,
    ob_dim: usize,
    params: ModelParams,
    use_huber: bool,
    optimizer: OptimizerWrapper,
    clipper: GradientClipper,
    comm: Arc<dyn Communicator>,
    rng: StdRng,
}

impl std::fmt::Debug for PpoModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PpoModel")
            .field("pdtype", &self.pdtype)
            .field("ob_dim", &self.ob_dim)
            .field("params", &self.params)
            .field("rank", &self.comm.rank())
            .finish()
    }
}

impl PpoModel {
    /// Build the networks and the optimizer. Parameters are broadcast from
    /// rank 0 so every member of the group starts from the same point.
    pub fn new(
        policy: &PolicyParams,
        params: ModelParams,
        comm: Option<Arc<dyn Communicator>>,
        mut rng: StdRng,
    ) -> Result<Self> {
        policy.validate()?;
        params.validate()?;

        let ob_dim = policy.ob_dim();
        let pdtype = PdType::from_space(&policy.ac_space);
        let actor = NeuralNetwork::new(
            ob_dim,
            &policy.layers,
            pdtype.param_size(),
            policy.act_fun,
            policy.layer_norm,
            POLICY_OUTPUT_GAIN,
            &mut rng,
        );
        let critic = NeuralNetwork::new(
            ob_dim,
            &policy.layers,
            1,
            policy.act_fun,
            policy.layer_norm,
            VALUE_OUTPUT_GAIN,
            &mut rng,
        );
        let log_std = match pdtype {
            PdType::DiagGaussian { dim } => Some(Array1::zeros(dim)),
            PdType::Categorical { .. } => None,
        };

        let comm = comm.unwrap_or_else(|| Arc::new(SingleProcess));
        if params.mpi_rank_weight == 0.0 && comm.size() > 1 {
            warn!(rank = comm.rank(), "mpi_rank_weight is 0, this rank contributes no gradients");
        }

        let mut model = PpoModel {
            actor,
            critic,
            log_std,
            pdtype,
            ob_dim,
            clipper: GradientClipper::from_max_norm(params.max_grad_norm),
            params,
            use_huber: policy.use_huber,
            optimizer: OptimizerWrapper::Adam(Adam::new(0.9, 0.999, ADAM_EPSILON)),
            comm,
            rng,
        };
        model.sync_from_root()?;
        Ok(model)
    }

    pub fn actor(&self) -> &NeuralNetwork {
        &self.actor
    }

    pub fn critic(&self) -> &NeuralNetwork {
        &self.critic
    }

    pub fn log_std(&self) -> Option<&Array1<f32>> {
        self.log_std.as_ref()
    }

    pub fn pdtype(&self) -> PdType {
        self.pdtype
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn ob_dim(&self) -> usize {
        self.ob_dim
    }

    /// Recurrent state of the policy. Always `None`: the networks are
    /// feed-forward.
    pub fn initial_state(&self) -> Option<ndarray::Array2<f32>> {
        None
    }

    fn check_obs(&self, obs: &ArrayView2<f32>) -> Result<()> {
        if obs.ncols() != self.ob_dim {
            return Err(PolicyError::width_mismatch("observation batch", self.ob_dim, obs.ncols()));
        }
        if obs.nrows() == 0 {
            return Err(PolicyError::EmptyBuffer("no observations".to_string()));
        }
        Ok(())
    }

    /// Sample (or, with `deterministic`, pick the most likely) actions and
    /// report the values and negative log-probabilities used for training.
    pub fn step(&mut self, obs: ArrayView2<f32>, deterministic: bool) -> Result<StepOutput> {
        self.check_obs(&obs)?;
        let pd = self.pdtype.make_pd(self.actor.predict(obs)?, self.log_std.as_ref())?;
        let actions = if deterministic { pd.mode() } else { pd.sample(&mut self.rng) };
        let neglogpacs = pd.neglogp(&actions)?;
        let values = self.critic.predict(obs)?.column(0).to_owned();
        Ok(StepOutput {
            actions,
            values,
            neglogpacs,
        })
    }

    pub fn value(&self, obs: ArrayView2<f32>) -> Result<Array1<f32>> {
        self.check_obs(&obs)?;
        Ok(self.critic.predict(obs)?.column(0).to_owned())
    }

    /// Values and negative log-probabilities of given actions
    pub fn evaluate(&self, obs: ArrayView2<f32>, actions: &ActionBatch) -> Result<(Array1<f32>, Array1<f32>)> {
        self.check_obs(&obs)?;
        let pd = self.pdtype.make_pd(self.actor.predict(obs)?, self.log_std.as_ref())?;
        let neglogpacs = pd.neglogp(actions)?;
        Ok((self.critic.predict(obs)?.column(0).to_owned(), neglogpacs))
    }

    /// One PPO gradient step on `batch`. Returns the statistics in
    /// `LOSS_NAMES` order, averaged over microbatches.
    ///
    /// Every member of a worker group must call this the same number of
    /// times. A member whose local step fails still joins the gradient
    /// all-reduce, so the whole group returns an error from the same step.
    pub fn train(&mut self, lr: f32, clip_range: f32, batch: &TrainBatch, update_actor: bool) -> Result<TrainStats> {
        let local = self.local_gradients(lr, clip_range, batch, update_actor);
        let (stats, mut gradients) = self.average_gradients(local)?;
        let grad_norm = self.clipper.clip(&mut gradients.arrays_mut());
        if !grad_norm.is_finite() {
            return Err(PolicyError::NumericalError(format!("gradient norm is {}", grad_norm)));
        }
        self.apply_gradients(&gradients, lr, update_actor)?;

        debug!(
            policy_loss = stats.policy_loss,
            value_loss = stats.value_loss,
            policy_entropy = stats.policy_entropy,
            approxkl = stats.approxkl,
            clipfrac = stats.clipfrac,
            grad_norm,
            "ppo gradient step"
        );
        Ok(stats)
    }

    /// This worker's gradients for `batch`, before any synchronization.
    fn local_gradients(
        &mut self,
        lr: f32,
        clip_range: f32,
        batch: &TrainBatch,
        update_actor: bool,
    ) -> Result<(TrainStats, ModelGradients)> {
        batch.validate(self.ob_dim)?;
        if !lr.is_finite() || lr < 0.0 {
            return Err(PolicyError::invalid_parameter("lr", format!("{} is not a valid learning rate", lr)));
        }
        if !clip_range.is_finite() || clip_range < 0.0 {
            return Err(PolicyError::invalid_parameter("clip_range", format!("{} is not a valid clip range", clip_range)));
        }

        // A(s, a) = R - V(s), normalised over the whole minibatch
        let advs = &batch.returns - &batch.values;
        let advs = normalize(advs.view(), ADVANTAGE_EPSILON);

        let n = batch.len();
        let chunk = self.params.microbatch_size.unwrap_or(n).min(n);
        let mut gradients = ModelGradients::zeros_like(self);
        let mut stats = TrainStats::default();
        let mut start = 0;
        while start < n {
            let end = (start + chunk).min(n);
            let weight = (end - start) as f32 / n as f32;
            let micro = if start == 0 && end == n { batch.clone() } else { batch.slice(start, end) };
            let micro_advs = advs.slice(ndarray::s![start..end]).to_owned();

            let (micro_stats, micro_grads) = self.compute_gradients(&micro, &micro_advs, clip_range, update_actor)?;
            gradients.add_scaled(&micro_grads, weight)?;
            stats += &micro_stats.scaled(weight);
            start = end;
        }

        let non_finite = count_non_finite(gradients.arrays().iter().flat_map(|a| a.iter()));
        if non_finite > 0 {
            return Err(PolicyError::NumericalError(format!("{} non-finite gradient entries", non_finite)));
        }
        Ok((stats, gradients))
    }

    /// Loss statistics and gradients for one (micro)batch.
    pub fn compute_gradients(
        &mut self,
        batch: &TrainBatch,
        advantages: &Array1<f32>,
        clip_range: f32,
        update_actor: bool,
    ) -> Result<(TrainStats, ModelGradients)> {
        let actor_out = self.actor.forward_batch(batch.obs.view())?;
        let vpred = self.critic.forward_batch(batch.obs.view())?.column(0).to_owned();
        let pd = self.pdtype.make_pd(actor_out, self.log_std.as_ref())?;
        let neglogpac = pd.neglogp(&batch.actions)?;
        let entropy = pd.entropy();

        let inputs = LossInputs {
            neglogpac: neglogpac.view(),
            entropy: entropy.view(),
            vpred: vpred.view(),
            old_neglogpac: batch.neglogpacs.view(),
            old_vpred: batch.values.view(),
            advantages: advantages.view(),
            returns: batch.returns.view(),
        };
        let coefs = LossCoefficients {
            clip_range,
            ent_coef: self.params.ent_coef,
            vf_coef: self.params.vf_coef,
            use_huber: self.use_huber,
        };
        let loss = ppo_loss(&inputs, &coefs)?;

        let d_vpred = loss.d_vpred.insert_axis(Axis(1));
        let critic = self.critic.backward_batch(d_vpred.view())?;

        let (actor, log_std) = if update_actor {
            let head = pd.backward(&batch.actions, loss.d_neglogpac.view(), loss.d_entropy.view())?;
            (self.actor.backward_batch(head.outputs.view())?, head.log_std)
        } else {
            (
                self.actor.zero_gradients(),
                self.log_std.as_ref().map(|s| Array1::zeros(s.len())),
            )
        };

        Ok((loss.stats, ModelGradients { actor, log_std, critic }))
    }

    /// Weighted average of the gradients over the communicator group.
    ///
    /// The buffer carries two extra slots: the rank weight and a failure
    /// count. A rank whose local step failed sends zero gradients with weight
    /// zero and a failure count of one, and every rank sees the sum.
    fn average_gradients(&self, local: Result<(TrainStats, ModelGradients)>) -> Result<(TrainStats, ModelGradients)> {
        if self.comm.size() == 1 {
            return local;
        }
        let weight = self.params.mpi_rank_weight;
        let mut flat: Vec<f32> = match &local {
            Ok((_, gradients)) => gradients.to_flat().into_iter().map(|g| g * weight).collect(),
            Err(_) => ModelGradients::zeros_like(self).to_flat(),
        };
        let failed = local.is_err();
        flat.push(if failed { 0.0 } else { weight });
        flat.push(if failed { 1.0 } else { 0.0 });
        self.comm.all_reduce_sum(&mut flat)?;

        let failures = flat.pop().unwrap_or(0.0);
        let total_weight = flat.pop().unwrap_or(0.0);
        let (stats, mut gradients) = local?;
        if failures > 0.0 {
            return Err(PolicyError::NumericalError(format!(
                "{} of {} workers failed this gradient step",
                failures,
                self.comm.size()
            )));
        }
        if total_weight <= 0.0 {
            return Err(PolicyError::TrainingError(
                "every rank has mpi_rank_weight 0, nothing to average".to_string(),
            ));
        }
        for g in flat.iter_mut() {
            *g /= total_weight;
        }
        gradients.read_flat(&flat)?;
        Ok((stats, gradients))
    }

    fn apply_gradients(&mut self, gradients: &ModelGradients, lr: f32, update_actor: bool) -> Result<()> {
        self.optimizer.begin_step();
        let log_std_slot = SLOTS_PER_LAYER * self.actor.layers.len();
        if update_actor {
            self.actor.apply_gradients(&mut self.optimizer, &gradients.actor, lr, 0)?;
            if let (Some(log_std), Some(grad)) = (&mut self.log_std, &gradients.log_std) {
                self.optimizer.update_biases(log_std_slot, log_std, grad, lr)?;
            }
        }
        self.critic
            .apply_gradients(&mut self.optimizer, &gradients.critic, lr, log_std_slot + 1)?;
        Ok(())
    }

    /// Every trainable variable, actor first, then `log_std`, then critic
    pub fn get_flat_params(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.num_parameters());
        self.actor.write_flat(&mut flat);
        if let Some(log_std) = &self.log_std {
            flat.extend(log_std.iter().copied());
        }
        self.critic.write_flat(&mut flat);
        flat
    }

    pub fn set_flat_params(&mut self, flat: &[f32]) -> Result<()> {
        if flat.len() != self.num_parameters() {
            return Err(PolicyError::dimension_mismatch(
                format!("{} parameters", self.num_parameters()),
                format!("{}", flat.len()),
            ));
        }
        let mut src = flat.iter();
        self.actor.read_flat(&mut src)?;
        if let Some(log_std) = &mut self.log_std {
            for (value, &v) in log_std.iter_mut().zip(&mut src) {
                *value = v;
            }
        }
        self.critic.read_flat(&mut src)
    }

    pub fn num_parameters(&self) -> usize {
        self.actor.num_parameters() + self.log_std.as_ref().map_or(0, |s| s.len()) + self.critic.num_parameters()
    }

    /// Overwrite every trainable variable with rank 0's values
    pub fn sync_from_root(&mut self) -> Result<()> {
        if self.comm.size() == 1 {
            return Ok(());
        }
        let mut flat = self.get_flat_params();
        self.comm.broadcast(&mut flat, 0)?;
        self.set_flat_params(&flat)
    }

    /// Persist the trainable variables
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let checkpoint = Checkpoint {
            actor: self.actor.clone(),
            critic: self.critic.clone(),
            log_std: self.log_std.clone(),
        };
        let serialized = bincode::serialize(&checkpoint)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Restore variables written by `save`. The checkpoint must come from a
    /// model with the same architecture.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let data = fs::read(path)?;
        let checkpoint: Checkpoint = bincode::deserialize(&data)?;

        let log_std_len = |s: &Option<Array1<f32>>| s.as_ref().map(|s| s.len());
        if checkpoint.actor.shapes() != self.actor.shapes()
            || checkpoint.critic.shapes() != self.critic.shapes()
            || log_std_len(&checkpoint.log_std) != log_std_len(&self.log_std)
        {
            return Err(PolicyError::dimension_mismatch(
                format!("{:?} / {:?}", self.actor.shapes(), self.critic.shapes()),
                format!("{:?} / {:?}", checkpoint.actor.shapes(), checkpoint.critic.shapes()),
            ));
        }

        let mut flat = Vec::with_capacity(self.num_parameters());
        checkpoint.actor.write_flat(&mut flat);
        if let Some(log_std) = &checkpoint.log_std {
            flat.extend(log_std.iter().copied());
        }
        checkpoint.critic.write_flat(&mut flat);
        self.set_flat_params(&flat)
    }
}
