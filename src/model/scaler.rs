use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Per-feature standardization, fitted once on training data. The same fitted
/// instance must transform everything the paired model ever scores; it is
/// never re-fitted at inference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<f32>) -> Self {
        let n = x.nrows().max(1) as f64;
        let dim = x.ncols();

        let mut mean = vec![0.0f64; dim];
        for row in x.rows() {
            for (m, v) in mean.iter_mut().zip(row.iter()) {
                *m += *v as f64;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0f64; dim];
        for row in x.rows() {
            for ((s, v), m) in var.iter_mut().zip(row.iter()).zip(mean.iter()) {
                let d = *v as f64 - m;
                *s += d * d;
            }
        }

        let scale = var
            .iter()
            .map(|s| {
                let sd = (s / n).sqrt();
                // Constant features pass through unscaled.
                if sd > 0.0 {
                    sd as f32
                } else {
                    1.0
                }
            })
            .collect();

        Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            scale,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            for ((v, m), s) in row.iter_mut().zip(self.mean.iter()).zip(self.scale.iter()) {
                *v = (*v - m) / s;
            }
        }
        out
    }

    pub fn transform_row(&self, row: &[f32]) -> Vec<f32> {
        row.iter()
            .zip(self.mean.iter())
            .zip(self.scale.iter())
            .map(|((v, m), s)| (v - m) / s)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fit_then_transform_standardizes_training_data() {
        let x = array![[1.0f32, 10.0], [2.0, 20.0], [3.0, 30.0]];
        let scaler = StandardScaler::fit(x.view());
        let z = scaler.transform(x.view());

        for col in 0..2 {
            let mean: f32 = z.column(col).iter().sum::<f32>() / 3.0;
            assert!(mean.abs() < 1e-6);
        }
    }

    #[test]
    fn transform_reproduces_training_values_without_refit() {
        let train = array![[1.0f32, 4.0], [2.0, 5.0], [3.0, 9.0]];
        let scaler = StandardScaler::fit(train.view());

        let first = scaler.transform(train.view());
        // An identical copy transformed later must reproduce the training-time
        // values exactly.
        let again = scaler.transform(train.clone().view());
        assert_eq!(first, again);

        let row: Vec<f32> = train.row(1).to_vec();
        let transformed_row = scaler.transform_row(&row);
        for (a, b) in transformed_row.iter().zip(first.row(1).iter()) {
            assert!((a - b).abs() < 1e-7);
        }
    }

    #[test]
    fn constant_feature_does_not_divide_by_zero() {
        let x = array![[5.0f32, 1.0], [5.0, 2.0], [5.0, 3.0]];
        let scaler = StandardScaler::fit(x.view());
        let z = scaler.transform(x.view());
        assert!(z.iter().all(|v| v.is_finite()));
        assert_eq!(z[[0, 0]], 0.0);
    }
}
