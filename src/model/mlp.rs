use anyhow::{bail, Result};
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::Model;

/// One-hidden-layer feed-forward regressor (ReLU hidden units, linear
/// output), trained with per-sample SGD on squared error.
#[derive(Debug, Clone)]
pub struct MlpRegressor {
    pub hidden: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for MlpRegressor {
    fn default() -> Self {
        Self {
            hidden: 64,
            epochs: 30,
            learning_rate: 0.005,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpModel {
    /// hidden x input weight rows.
    pub w1: Vec<Vec<f32>>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: f32,
}

impl MlpModel {
    pub fn predict(&self, features: &[f32]) -> f32 {
        let mut out = self.b2;
        for ((row, b), w_out) in self.w1.iter().zip(self.b1.iter()).zip(self.w2.iter()) {
            let z = row
                .iter()
                .zip(features.iter())
                .map(|(w, x)| w * x)
                .sum::<f32>()
                + b;
            if z > 0.0 {
                out += w_out * z;
            }
        }
        out
    }
}

impl MlpRegressor {
    pub fn fit(&self, x: ArrayView2<f32>, y: ArrayView1<f32>) -> Result<Model> {
        let n = x.nrows();
        let dim = x.ncols();
        if n == 0 || n != y.len() {
            bail!("mlp fit needs matching non-empty inputs, got {n} rows and {} targets", y.len());
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let bound1 = 1.0 / (dim as f32).sqrt();
        let bound2 = 1.0 / (self.hidden as f32).sqrt();

        let mut w1: Vec<Vec<f32>> = (0..self.hidden)
            .map(|_| (0..dim).map(|_| rng.gen_range(-bound1..bound1)).collect())
            .collect();
        let mut b1 = vec![0.0f32; self.hidden];
        let mut w2: Vec<f32> = (0..self.hidden)
            .map(|_| rng.gen_range(-bound2..bound2))
            .collect();
        let mut b2 = y.iter().sum::<f32>() / n as f32;

        let mut order: Vec<usize> = (0..n).collect();
        let mut hidden = vec![0.0f32; self.hidden];

        for _ in 0..self.epochs {
            order.shuffle(&mut rng);

            for &i in &order {
                let row = x.row(i);

                // Forward pass.
                let mut out = b2;
                for (h, (wrow, b)) in w1.iter().zip(b1.iter()).enumerate() {
                    let z = wrow
                        .iter()
                        .zip(row.iter())
                        .map(|(w, v)| w * v)
                        .sum::<f32>()
                        + b;
                    hidden[h] = z.max(0.0);
                    out += w2[h] * hidden[h];
                }

                // Backward pass for squared error.
                let delta = out - y[i];
                b2 -= self.learning_rate * delta;
                for h in 0..self.hidden {
                    let grad_out = delta * hidden[h];
                    let grad_hidden = if hidden[h] > 0.0 { delta * w2[h] } else { 0.0 };
                    w2[h] -= self.learning_rate * grad_out;
                    if grad_hidden != 0.0 {
                        b1[h] -= self.learning_rate * grad_hidden;
                        for (w, v) in w1[h].iter_mut().zip(row.iter()) {
                            *w -= self.learning_rate * grad_hidden * v;
                        }
                    }
                }
            }
        }

        Ok(Model::Mlp(MlpModel { w1, b1, w2, b2 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn linear_data() -> (Array2<f32>, Array1<f32>) {
        let xs: Vec<f32> = (0..30).map(|i| -1.0 + i as f32 / 14.5).collect();
        let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
        (
            Array2::from_shape_vec((30, 1), xs).unwrap(),
            Array1::from_vec(ys),
        )
    }

    #[test]
    fn mlp_beats_the_mean_baseline() {
        let (x, y) = linear_data();
        let mlp = MlpRegressor {
            hidden: 8,
            epochs: 200,
            learning_rate: 0.01,
            seed: 7,
        };
        let model = mlp.fit(x.view(), y.view()).unwrap();

        let mean = y.iter().sum::<f32>() / y.len() as f32;
        let baseline: f32 = y.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / y.len() as f32;
        let mse: f32 = x
            .rows()
            .into_iter()
            .zip(y.iter())
            .map(|(row, target)| (model.predict(row.as_slice().unwrap()) - target).powi(2))
            .sum::<f32>()
            / y.len() as f32;

        assert!(mse < baseline * 0.5, "mse {mse} vs baseline {baseline}");
    }

    #[test]
    fn mlp_is_deterministic_for_a_seed() {
        let (x, y) = linear_data();
        let mlp = MlpRegressor::default();
        let a = mlp.fit(x.view(), y.view()).unwrap();
        let b = mlp.fit(x.view(), y.view()).unwrap();
        match (a, b) {
            (Model::Mlp(a), Model::Mlp(b)) => assert_eq!(a, b),
            _ => panic!("expected mlp models"),
        }
    }
}
