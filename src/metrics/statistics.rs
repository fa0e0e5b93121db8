use ndarray::{Array1, ArrayView1};

/// Statistics for a collection of values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub mean: f32,
    /// Population standard deviation
    pub std: f32,
    pub min: f32,
    pub max: f32,
    pub count: usize,
}

impl Statistics {
    /// Compute statistics from a slice of values
    pub fn from_slice(values: &[f32]) -> Self {
        if values.is_empty() {
            return Statistics {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
                count: 0,
            };
        }

        let count = values.len();
        let sum: f32 = values.iter().sum();
        let mean = sum / count as f32;

        let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / count as f32;
        let std = variance.sqrt();

        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        Statistics {
            mean,
            std,
            min,
            max,
            count,
        }
    }

    /// Compute statistics from an array view
    pub fn from_array(array: ArrayView1<f32>) -> Self {
        match array.as_slice() {
            Some(values) => Self::from_slice(values),
            None => Self::from_slice(&array.to_vec()),
        }
    }

    pub fn variance(&self) -> f32 {
        self.std * self.std
    }
}

/// `(x - mean) / (std + epsilon)`
pub fn normalize(values: ArrayView1<f32>, epsilon: f32) -> Array1<f32> {
    let stats = Statistics::from_array(values);
    values.mapv(|x| (x - stats.mean) / (stats.std + epsilon))
}

/// Fraction of the variance of `y` explained by `ypred`:
/// `1 - Var[y - ypred] / Var[y]`.
///
/// 1 is a perfect prediction, 0 is no better than predicting the mean and
/// negative values are worse than that. NaN when `y` has no variance.
pub fn explained_variance(ypred: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let var_y = Statistics::from_array(y).variance();
    if var_y == 0.0 {
        return f32::NAN;
    }
    let residual = &y - &ypred;
    1.0 - Statistics::from_array(residual.view()).variance() / var_y
}

/// Count NaN and infinite values
pub fn count_non_finite<'a, I: IntoIterator<Item = &'a f32>>(values: I) -> usize {
    values.into_iter().filter(|v| !v.is_finite()).count()
}
