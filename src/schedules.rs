use serde::{Deserialize, Serialize};

/// A scalar hyperparameter (learning rate, clip range) as a function of
/// training progress.
///
/// `step` counts policy updates; `total_steps` is the planned number of
/// updates. Progress is clamped to `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Constant value
    Constant { value: f32 },

    /// Linear interpolation from `initial` to `final_value`
    LinearDecay { initial: f32, final_value: f32 },

    /// `min + 0.5 * (max - min) * (1 + cos(pi * progress))`
    CosineAnnealing { max: f32, min: f32 },
}

impl Schedule {
    pub fn constant(value: f32) -> Self {
        Schedule::Constant { value }
    }

    pub fn linear(initial: f32, final_value: f32) -> Self {
        Schedule::LinearDecay { initial, final_value }
    }

    pub fn value_at(&self, step: usize, total_steps: usize) -> f32 {
        let progress = if total_steps == 0 {
            0.0
        } else {
            (step as f32 / total_steps as f32).clamp(0.0, 1.0)
        };

        match *self {
            Schedule::Constant { value } => value,
            Schedule::LinearDecay { initial, final_value } => initial + (final_value - initial) * progress,
            Schedule::CosineAnnealing { max, min } => {
                min + 0.5 * (max - min) * (1.0 + (std::f32::consts::PI * progress).cos())
            }
        }
    }

    /// Smallest value the schedule can take
    pub fn min_value(&self) -> f32 {
        match *self {
            Schedule::Constant { value } => value,
            Schedule::LinearDecay { initial, final_value } => initial.min(final_value),
            Schedule::CosineAnnealing { max, min } => max.min(min),
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Constant { value: 3e-4 }
    }
}
