use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::Model;

/// Closed-form ridge regression: centers the data, solves the regularized
/// normal equations by Cholesky, recovers the intercept from the means.
#[derive(Debug, Clone)]
pub struct Ridge {
    pub alpha: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeModel {
    pub weights: Vec<f32>,
    pub intercept: f32,
}

impl RidgeModel {
    pub fn predict(&self, features: &[f32]) -> f32 {
        self.weights
            .iter()
            .zip(features.iter())
            .map(|(w, x)| w * x)
            .sum::<f32>()
            + self.intercept
    }
}

impl Ridge {
    pub fn fit(&self, x: ArrayView2<f32>, y: ArrayView1<f32>) -> Result<Model> {
        let n = x.nrows();
        let dim = x.ncols();
        if n == 0 || n != y.len() {
            bail!("ridge fit needs matching non-empty inputs, got {n} rows and {} targets", y.len());
        }

        // Work in f64; the Gram matrix of a few thousand rows loses too much
        // in single precision.
        let xf: Array2<f64> = x.mapv(|v| v as f64);
        let yf: Array1<f64> = y.mapv(|v| v as f64);

        let x_mean = xf.mean_axis(ndarray::Axis(0)).unwrap();
        let y_mean = yf.mean().unwrap_or(0.0);
        let xc = &xf - &x_mean;
        let yc = &yf - y_mean;

        // (Xc^T Xc + alpha I) w = Xc^T yc
        let mut gram = xc.t().dot(&xc);
        for i in 0..dim {
            gram[[i, i]] += self.alpha as f64;
        }
        let rhs = xc.t().dot(&yc);

        let weights = cholesky_solve(gram, rhs)?;
        let intercept = y_mean - weights.dot(&x_mean);

        Ok(Model::Ridge(RidgeModel {
            weights: weights.iter().map(|w| *w as f32).collect(),
            intercept: intercept as f32,
        }))
    }
}

/// Solve `a x = b` for symmetric positive-definite `a`.
fn cholesky_solve(a: Array2<f64>, b: Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 {
                    bail!("matrix is not positive definite");
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    // Forward substitution: L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }

    // Back substitution: L^T x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn cholesky_solves_spd_system() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![10.0, 8.0];
        let x = cholesky_solve(a.clone(), b.clone()).unwrap();
        let back = a.dot(&x);
        for (got, want) in back.iter().zip(b.iter()) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        assert!(cholesky_solve(a, array![1.0, 1.0]).is_err());
    }

    #[test]
    fn ridge_recovers_linear_relation() {
        // y = 2*x0 - x1 + 3 over a grid of points.
        let mut rows = Vec::new();
        let mut ys = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                let x0 = i as f32 * 0.5;
                let x1 = j as f32 * 0.3;
                rows.push([x0, x1]);
                ys.push(2.0 * x0 - x1 + 3.0);
            }
        }
        let x = Array2::from_shape_vec((100, 2), rows.concat()).unwrap();
        let y = Array1::from_vec(ys);

        let model = Ridge { alpha: 1e-4 }.fit(x.view(), y.view()).unwrap();
        let Model::Ridge(m) = &model else {
            panic!("expected ridge model");
        };
        assert!((m.weights[0] - 2.0).abs() < 1e-2);
        assert!((m.weights[1] + 1.0).abs() < 1e-2);
        assert!((m.intercept - 3.0).abs() < 5e-2);
        assert!((model.predict(&[1.0, 1.0]) - 4.0).abs() < 1e-2);
    }
}
