//! Training statistics for the PPO update.

use std::collections::BTreeMap;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Names of the statistics returned by `PpoModel::train`, in order.
pub const LOSS_NAMES: [&str; 5] = ["policy_loss", "value_loss", "policy_entropy", "approxkl", "clipfrac"];

/// Statistics of a single gradient step (or their average over several).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainStats {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub policy_entropy: f32,
    pub approxkl: f32,
    pub clipfrac: f32,
}

impl TrainStats {
    /// Values in `LOSS_NAMES` order
    pub fn to_array(&self) -> [f32; 5] {
        [
            self.policy_loss,
            self.value_loss,
            self.policy_entropy,
            self.approxkl,
            self.clipfrac,
        ]
    }

    pub fn as_map(&self) -> BTreeMap<String, f32> {
        LOSS_NAMES
            .iter()
            .zip(self.to_array())
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    pub fn scaled(&self, factor: f32) -> Self {
        TrainStats {
            policy_loss: self.policy_loss * factor,
            value_loss: self.value_loss * factor,
            policy_entropy: self.policy_entropy * factor,
            approxkl: self.approxkl * factor,
            clipfrac: self.clipfrac * factor,
        }
    }

    /// Mean of a set of statistics, zeros when empty
    pub fn average(stats: &[TrainStats]) -> Self {
        if stats.is_empty() {
            return TrainStats::default();
        }
        let mut total = TrainStats::default();
        for s in stats {
            total += s;
        }
        total.scaled(1.0 / stats.len() as f32)
    }
}

impl AddAssign<&TrainStats> for TrainStats {
    fn add_assign(&mut self, other: &TrainStats) {
        self.policy_loss += other.policy_loss;
        self.value_loss += other.value_loss;
        self.policy_entropy += other.policy_entropy;
        self.approxkl += other.approxkl;
        self.clipfrac += other.clipfrac;
    }
}
