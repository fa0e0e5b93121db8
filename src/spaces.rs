//! Observation, action and context spaces.

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// A gym-style space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Space {
    /// Integers `0..n`
    Discrete { n: usize },

    /// Vectors bounded element-wise by `low` and `high`
    Box { low: Array1<f32>, high: Array1<f32> },
}

impl Space {
    pub fn discrete(n: usize) -> Self {
        Space::Discrete { n }
    }

    /// Box with the same bounds on every dimension
    pub fn uniform_box(dim: usize, low: f32, high: f32) -> Self {
        Space::Box {
            low: Array1::from_elem(dim, low),
            high: Array1::from_elem(dim, high),
        }
    }

    /// Flattened dimension: `n` for discrete spaces (one-hot width), the
    /// vector length for boxes.
    pub fn shape(&self) -> usize {
        match self {
            Space::Discrete { n } => *n,
            Space::Box { low, .. } => low.len(),
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Space::Discrete { .. })
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Space::Discrete { n } if *n == 0 => Err(PolicyError::invalid_parameter(
                "space",
                "discrete space needs at least one element",
            )),
            Space::Discrete { .. } => Ok(()),
            Space::Box { low, high } => {
                if low.len() != high.len() {
                    return Err(PolicyError::dimension_mismatch(low.len().to_string(), high.len().to_string()));
                }
                if low.is_empty() {
                    return Err(PolicyError::invalid_parameter("space", "box space has no dimensions"));
                }
                if low.iter().zip(high.iter()).any(|(l, h)| l > h) {
                    return Err(PolicyError::invalid_parameter("space", "box has low > high"));
                }
                Ok(())
            }
        }
    }

    /// Check a discrete action index against the space
    pub fn check_discrete_action(&self, action: usize) -> Result<()> {
        match self {
            Space::Discrete { n } if action >= *n => Err(PolicyError::InvalidAction {
                action,
                max_actions: *n,
            }),
            _ => Ok(()),
        }
    }

    /// Uniform sample from a box space. Discrete spaces are sampled through
    /// `sample_discrete`.
    pub fn sample_box<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Array1<f32>> {
        match self {
            Space::Box { low, high } => {
                if low.iter().chain(high.iter()).any(|v| !v.is_finite()) {
                    return Err(PolicyError::invalid_parameter(
                        "ac_space",
                        "cannot sample uniformly from an unbounded box",
                    ));
                }
                Ok(Array1::from_iter(
                    low.iter().zip(high.iter()).map(|(&l, &h)| if h > l { rng.gen_range(l..h) } else { l }),
                ))
            }
            Space::Discrete { .. } => Err(PolicyError::invalid_parameter("space", "not a box space")),
        }
    }

    pub fn sample_discrete<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<usize> {
        match self {
            Space::Discrete { n } if *n > 0 => Ok(rng.gen_range(0..*n)),
            _ => Err(PolicyError::invalid_parameter("space", "not a non-empty discrete space")),
        }
    }
}
