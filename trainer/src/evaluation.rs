use anyhow::{bail, Result};
use gdp_backend::artifact::EvaluationMetrics;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Row indices of a shuffled train/test partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Split {
    /// Shuffles `0..n` with `seed`; the first `ceil(test_size * n)` indices
    /// form the test set.
    pub fn shuffled(n: usize, test_size: f64, seed: u64) -> Result<Self> {
        if !(test_size > 0.0 && test_size < 1.0) {
            bail!("test size must be strictly between 0 and 1, got {test_size}");
        }
        let n_test = (test_size * n as f64).ceil() as usize;
        if n_test == 0 || n_test >= n {
            bail!("{n} rows cannot be split with test size {test_size}");
        }

        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        let train = indices.split_off(n_test);
        Ok(Self {
            train,
            test: indices,
        })
    }

    pub fn select<'a>(
        indices: &[usize],
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, f64>,
    ) -> (Array2<f64>, Array1<f64>) {
        (x.select(Axis(0), indices), y.select(Axis(0), indices))
    }
}

/// R², MAE and RMSE of `predicted` against `actual`.
pub fn evaluate(predicted: &[f64], actual: ArrayView1<'_, f64>) -> EvaluationMetrics {
    let n = actual.len();
    if n == 0 {
        return EvaluationMetrics {
            r2: 0.0,
            mae: 0.0,
            rmse: 0.0,
            test_rows: 0,
        };
    }

    let mean = actual.sum() / n as f64;
    let (mut abs_err, mut sq_err, mut total) = (0.0, 0.0, 0.0);
    for (p, a) in predicted.iter().zip(actual.iter()) {
        abs_err += (p - a).abs();
        sq_err += (p - a).powi(2);
        total += (a - mean).powi(2);
    }

    // Constant targets: perfect fit scores 1, anything else 0.
    let r2 = if total > 0.0 {
        1.0 - sq_err / total
    } else if sq_err == 0.0 {
        1.0
    } else {
        0.0
    };

    EvaluationMetrics {
        r2,
        mae: abs_err / n as f64,
        rmse: (sq_err / n as f64).sqrt(),
        test_rows: n,
    }
}
