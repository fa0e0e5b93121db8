use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Weight initialization strategies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeightInit {
    /// Orthogonal matrix scaled by `gain`
    Orthogonal { gain: f32 },
}

impl WeightInit {
    /// Initialize a `(fan_in, fan_out)` weight matrix.
    pub fn initialize_weights<R: Rng + ?Sized>(&self, shape: (usize, usize), rng: &mut R) -> Array2<f32> {
        match self {
            WeightInit::Orthogonal { gain } => orthogonal(shape, *gain, rng),
        }
    }

    /// Biases always start at zero.
    pub fn initialize_biases(&self, size: usize) -> Array1<f32> {
        Array1::zeros(size)
    }
}

/// Orthogonal initialization through Gram-Schmidt on a Gaussian matrix.
///
/// The result has orthonormal columns when `fan_in >= fan_out` and orthonormal
/// rows otherwise, scaled by `gain`.
fn orthogonal<R: Rng + ?Sized>(shape: (usize, usize), gain: f32, rng: &mut R) -> Array2<f32> {
    let (rows, cols) = shape;
    let transpose = rows < cols;
    let (n, k) = if transpose { (cols, rows) } else { (rows, cols) };

    let mut q: Array2<f32> = Array2::random_using((n, k), StandardNormal, rng);
    for j in 0..k {
        for i in 0..j {
            let proj = q.column(i).dot(&q.column(j));
            let basis = q.column(i).to_owned();
            q.column_mut(j).scaled_add(-proj, &basis);
        }
        let norm = q.column(j).dot(&q.column(j)).sqrt();
        if norm > 1e-12 {
            q.column_mut(j).mapv_inplace(|v| v / norm);
        }
    }

    q.mapv_inplace(|v| v * gain);
    let q = if transpose { q.reversed_axes() } else { q };
    q.as_standard_layout().to_owned()
}
