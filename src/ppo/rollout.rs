use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::distributions::ActionBatch;
use crate::error::{PolicyError, Result};

/// Trajectory storage for one environment.
#[derive(Clone, Debug, Default)]
pub struct RolloutBuffer {
    pub obs: Vec<Array1<f32>>,
    /// One single-row batch per step
    pub actions: Vec<ActionBatch>,
    pub rewards: Vec<f32>,
    pub values: Vec<f32>,
    pub neglogps: Vec<f32>,
    pub dones: Vec<bool>,
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
    /// Observation following the most recent step, used to bootstrap
    pub last_obs: Option<Array1<f32>>,
}

impl RolloutBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        obs: Array1<f32>,
        action: ActionBatch,
        reward: f32,
        value: f32,
        neglogp: f32,
        done: bool,
        next_obs: Array1<f32>,
    ) {
        self.obs.push(obs);
        self.actions.push(action);
        self.rewards.push(reward);
        self.values.push(value);
        self.neglogps.push(neglogp);
        self.dones.push(done);
        self.last_obs = Some(next_obs);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn len(&self) -> usize {
        self.obs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obs.is_empty()
    }

    /// Whether the last stored step ended an episode
    pub fn ends_with_done(&self) -> bool {
        self.dones.last().copied().unwrap_or(false)
    }

    /// Generalized advantage estimation.
    ///
    /// A `done` at step `t` stops bootstrapping from step `t + 1` (or from
    /// `last_value` at the end of the buffer). Returns are
    /// `advantages + values`.
    pub fn compute_gae(&mut self, last_value: f32, gamma: f32, lam: f32) {
        let n = self.rewards.len();
        self.advantages = vec![0.0; n];
        self.returns = vec![0.0; n];

        let mut gae = 0.0;
        for i in (0..n).rev() {
            let not_done = if self.dones[i] { 0.0 } else { 1.0 };
            let next_value = if i == n - 1 { last_value } else { self.values[i + 1] };

            let delta = self.rewards[i] + gamma * next_value * not_done - self.values[i];
            gae = delta + gamma * lam * not_done * gae;

            self.advantages[i] = gae;
            self.returns[i] = gae + self.values[i];
        }
    }
}

/// Flattened samples consumed by `PpoModel::train`.
#[derive(Clone, Debug)]
pub struct TrainBatch {
    pub obs: Array2<f32>,
    pub returns: Array1<f32>,
    pub actions: ActionBatch,
    /// Value predictions recorded when acting
    pub values: Array1<f32>,
    /// Negative log-probabilities recorded when acting
    pub neglogpacs: Array1<f32>,
}

impl TrainBatch {
    pub fn len(&self) -> usize {
        self.obs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every field holds `len()` samples and the observation
    /// width is `ob_dim`.
    pub fn validate(&self, ob_dim: usize) -> Result<()> {
        let n = self.len();
        if n == 0 {
            return Err(PolicyError::EmptyBuffer("training batch has no samples".to_string()));
        }
        if self.obs.ncols() != ob_dim {
            return Err(PolicyError::width_mismatch("observation batch", ob_dim, self.obs.ncols()));
        }
        let lengths = [
            ("returns", self.returns.len()),
            ("actions", self.actions.len()),
            ("values", self.values.len()),
            ("neglogpacs", self.neglogpacs.len()),
        ];
        for (name, len) in lengths {
            if len != n {
                return Err(PolicyError::dimension_mismatch(
                    format!("{} {}", n, name),
                    format!("{}", len),
                ));
            }
        }
        Ok(())
    }

    pub fn select(&self, indices: &[usize]) -> TrainBatch {
        TrainBatch {
            obs: self.obs.select(Axis(0), indices),
            returns: self.returns.select(Axis(0), indices),
            actions: self.actions.select(indices),
            values: self.values.select(Axis(0), indices),
            neglogpacs: self.neglogpacs.select(Axis(0), indices),
        }
    }

    /// Samples `start..end`
    pub fn slice(&self, start: usize, end: usize) -> TrainBatch {
        let indices: Vec<usize> = (start..end).collect();
        self.select(&indices)
    }

    /// Gather the processed samples of several buffers. `compute_gae` must
    /// have been called on each of them.
    pub fn from_buffers(buffers: &[RolloutBuffer]) -> Result<TrainBatch> {
        let filled: Vec<&RolloutBuffer> = buffers.iter().filter(|b| !b.is_empty()).collect();
        if filled.is_empty() {
            return Err(PolicyError::EmptyBuffer("no stored transitions".to_string()));
        }
        for buffer in &filled {
            if buffer.returns.len() != buffer.len() {
                return Err(PolicyError::TrainingError(
                    "advantages have not been computed for every buffer".to_string(),
                ));
            }
        }

        let obs: Vec<ArrayView1<f32>> = filled.iter().flat_map(|b| b.obs.iter().map(|o| o.view())).collect();
        let actions: Vec<ActionBatch> = filled.iter().flat_map(|b| b.actions.iter().cloned()).collect();
        let returns: Array1<f32> = filled.iter().flat_map(|b| b.returns.iter().copied()).collect();
        let values: Array1<f32> = filled.iter().flat_map(|b| b.values.iter().copied()).collect();
        let neglogpacs: Array1<f32> = filled.iter().flat_map(|b| b.neglogps.iter().copied()).collect();

        Ok(TrainBatch {
            obs: stack_rows(&obs)?,
            returns,
            actions: ActionBatch::concat(&actions)?,
            values,
            neglogpacs,
        })
    }
}

/// Stack equally sized vectors into the rows of a matrix
pub fn stack_rows(rows: &[ArrayView1<f32>]) -> Result<Array2<f32>> {
    if rows.is_empty() {
        return Err(PolicyError::EmptyBuffer("no rows to stack".to_string()));
    }
    ndarray::stack(Axis(0), rows).map_err(|e| PolicyError::dimension_mismatch("rows of equal length", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn buffer(rewards: &[f32], values: &[f32], dones: &[bool]) -> RolloutBuffer {
        let mut buffer = RolloutBuffer::new();
        for i in 0..rewards.len() {
            buffer.add(
                array![i as f32],
                ActionBatch::Discrete(vec![0]),
                rewards[i],
                values[i],
                0.5,
                dones[i],
                array![i as f32 + 1.0],
            );
        }
        buffer
    }

    #[test]
    fn test_gae_without_discounting_is_reward_to_go() {
        let mut b = buffer(&[1.0, 1.0, 1.0], &[0.0, 0.0, 0.0], &[false, false, true]);
        b.compute_gae(10.0, 1.0, 1.0);
        assert_eq!(b.returns, vec![3.0, 2.0, 1.0]);
        assert_eq!(b.advantages, b.returns);
    }

    #[test]
    fn test_bootstrap_from_last_value() {
        let mut b = buffer(&[1.0], &[0.5], &[false]);
        b.compute_gae(2.0, 0.9, 0.95);
        // delta = 1 + 0.9 * 2 - 0.5
        assert!((b.advantages[0] - 2.3).abs() < 1e-6);
        assert!((b.returns[0] - 2.8).abs() < 1e-6);
    }

    #[test]
    fn test_done_stops_bootstrapping() {
        let mut b = buffer(&[0.0, 5.0], &[1.0, 3.0], &[true, false]);
        b.compute_gae(0.0, 0.99, 0.95);
        // step 0 ends an episode: nothing flows back from step 1
        assert!((b.advantages[0] + 1.0).abs() < 1e-6);
        assert!((b.advantages[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_batch_from_buffers() {
        let mut a = buffer(&[1.0, 2.0], &[0.0, 0.0], &[false, false]);
        let mut b = buffer(&[3.0], &[0.0], &[true]);
        a.compute_gae(0.0, 1.0, 1.0);
        b.compute_gae(0.0, 1.0, 1.0);
        let batch = TrainBatch::from_buffers(&[a, RolloutBuffer::new(), b]).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.validate(1).is_ok());
        assert_eq!(batch.returns, array![3.0, 2.0, 3.0]);
        assert_eq!(batch.actions, ActionBatch::Discrete(vec![0, 0, 0]));

        let sub = batch.select(&[2, 0]);
        assert_eq!(sub.obs, array![[0.0], [0.0]]);
        assert_eq!(sub.returns, array![3.0, 3.0]);
    }

    #[test]
    fn test_unprocessed_or_empty_buffers_rejected() {
        let raw = buffer(&[1.0], &[0.0], &[false]);
        assert!(TrainBatch::from_buffers(&[raw]).is_err());
        assert!(matches!(
            TrainBatch::from_buffers(&[RolloutBuffer::new()]),
            Err(PolicyError::EmptyBuffer(_))
        ));
    }
}
