use anyhow::{bail, Result};
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::Model;

/// Linear support-vector regression with an epsilon-insensitive loss, fitted
/// by subgradient descent over seeded shuffles of the training set.
#[derive(Debug, Clone)]
pub struct LinearSvr {
    /// Inverse regularization strength; larger C fits the data harder.
    pub c: f32,
    pub epsilon: f32,
    pub epochs: usize,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for LinearSvr {
    fn default() -> Self {
        Self {
            c: 1.0,
            epsilon: 0.1,
            epochs: 50,
            learning_rate: 0.01,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvrModel {
    pub weights: Vec<f32>,
    pub bias: f32,
}

impl SvrModel {
    pub fn predict(&self, features: &[f32]) -> f32 {
        self.weights
            .iter()
            .zip(features.iter())
            .map(|(w, x)| w * x)
            .sum::<f32>()
            + self.bias
    }
}

impl LinearSvr {
    pub fn fit(&self, x: ArrayView2<f32>, y: ArrayView1<f32>) -> Result<Model> {
        let n = x.nrows();
        let dim = x.ncols();
        if n == 0 || n != y.len() {
            bail!("svr fit needs matching non-empty inputs, got {n} rows and {} targets", y.len());
        }

        let lambda = 1.0 / (self.c * n as f32);
        let mut weights = vec![0.0f32; dim];
        let mut bias = y.iter().sum::<f32>() / n as f32;

        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);

        for epoch in 0..self.epochs {
            order.shuffle(&mut rng);
            // Diminishing step keeps late epochs from oscillating.
            let lr = self.learning_rate / (1.0 + epoch as f32 * 0.1);

            for &i in &order {
                let row = x.row(i);
                let pred = weights
                    .iter()
                    .zip(row.iter())
                    .map(|(w, v)| w * v)
                    .sum::<f32>()
                    + bias;
                let err = pred - y[i];

                // Subgradient of the epsilon-insensitive loss.
                let sign = if err > self.epsilon {
                    1.0
                } else if err < -self.epsilon {
                    -1.0
                } else {
                    0.0
                };

                for (w, v) in weights.iter_mut().zip(row.iter()) {
                    *w -= lr * (lambda * *w + sign * v);
                }
                bias -= lr * sign;
            }
        }

        Ok(Model::LinearSvr(SvrModel { weights, bias }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn linear_data() -> (Array2<f32>, Array1<f32>) {
        // y = 1.5*x on [-1, 1].
        let xs: Vec<f32> = (0..40).map(|i| -1.0 + i as f32 / 19.5).collect();
        let ys: Vec<f32> = xs.iter().map(|x| 1.5 * x).collect();
        (
            Array2::from_shape_vec((40, 1), xs).unwrap(),
            Array1::from_vec(ys),
        )
    }

    #[test]
    fn svr_fits_a_linear_target() {
        let (x, y) = linear_data();
        let svr = LinearSvr {
            epochs: 200,
            ..LinearSvr::default()
        };
        let model = svr.fit(x.view(), y.view()).unwrap();

        // Within the epsilon tube plus slack.
        let pred = model.predict(&[0.5]);
        assert!((pred - 0.75).abs() < 0.3, "prediction {pred} too far off");
    }

    #[test]
    fn svr_is_deterministic_for_a_seed() {
        let (x, y) = linear_data();
        let svr = LinearSvr::default();
        let a = svr.fit(x.view(), y.view()).unwrap();
        let b = svr.fit(x.view(), y.view()).unwrap();
        match (a, b) {
            (Model::LinearSvr(a), Model::LinearSvr(b)) => assert_eq!(a, b),
            _ => panic!("expected svr models"),
        }
    }
}
