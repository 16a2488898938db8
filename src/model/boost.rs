use anyhow::{bail, Result};
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::Model;

/// Gradient boosting over depth-1 regression trees (stumps). Each round fits
/// the best single-feature threshold split to the current residuals; the
/// learning rate is folded into the stored leaf values.
#[derive(Debug, Clone)]
pub struct StumpBoost {
    pub rounds: usize,
    pub learning_rate: f32,
    /// Candidate thresholds per feature, taken at evenly spaced quantiles.
    pub thresholds: usize,
    /// Fraction of features considered per round.
    pub feature_fraction: f32,
    pub seed: u64,
}

impl Default for StumpBoost {
    fn default() -> Self {
        Self {
            rounds: 150,
            learning_rate: 0.1,
            thresholds: 8,
            feature_fraction: 0.7,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f32,
    /// Leaf values with the learning rate already applied.
    pub left: f32,
    pub right: f32,
}

impl Stump {
    fn value(&self, features: &[f32]) -> f32 {
        if features[self.feature] <= self.threshold {
            self.left
        } else {
            self.right
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostModel {
    pub base: f32,
    pub stumps: Vec<Stump>,
}

impl BoostModel {
    pub fn predict(&self, features: &[f32]) -> f32 {
        self.base + self.stumps.iter().map(|s| s.value(features)).sum::<f32>()
    }
}

impl StumpBoost {
    pub fn fit(&self, x: ArrayView2<f32>, y: ArrayView1<f32>) -> Result<Model> {
        let n = x.nrows();
        let dim = x.ncols();
        if n == 0 || n != y.len() {
            bail!("boost fit needs matching non-empty inputs, got {n} rows and {} targets", y.len());
        }

        let base = y.iter().sum::<f32>() / n as f32;
        let mut residuals: Vec<f32> = y.iter().map(|v| v - base).collect();
        let mut stumps = Vec::with_capacity(self.rounds);

        let picks = ((dim as f32 * self.feature_fraction).ceil() as usize).clamp(1, dim);
        let mut features: Vec<usize> = (0..dim).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);

        for _ in 0..self.rounds {
            features.shuffle(&mut rng);

            let mut best: Option<(f64, Stump)> = None;
            for &feature in &features[..picks] {
                let column: Vec<f32> = x.column(feature).to_vec();
                for threshold in quantile_thresholds(&column, self.thresholds) {
                    let Some((sse, left, right)) =
                        split_score(&column, &residuals, threshold)
                    else {
                        continue;
                    };
                    if best.as_ref().map(|(b, _)| sse < *b).unwrap_or(true) {
                        best = Some((
                            sse,
                            Stump {
                                feature,
                                threshold,
                                left: left * self.learning_rate,
                                right: right * self.learning_rate,
                            },
                        ));
                    }
                }
            }

            let Some((_, stump)) = best else {
                break; // nothing left to split on
            };

            for (i, r) in residuals.iter_mut().enumerate() {
                let xi = x[[i, stump.feature]];
                *r -= if xi <= stump.threshold {
                    stump.left
                } else {
                    stump.right
                };
            }
            stumps.push(stump);
        }

        Ok(Model::Boost(BoostModel { base, stumps }))
    }
}

fn quantile_thresholds(column: &[f32], count: usize) -> Vec<f32> {
    let mut sorted = column.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    if sorted.len() <= 1 {
        return vec![];
    }

    let count = count.min(sorted.len() - 1);
    (1..=count)
        .map(|i| sorted[i * (sorted.len() - 1) / (count + 1)])
        .collect()
}

/// Residual SSE and leaf means for a single split, or None when one side is
/// empty.
fn split_score(column: &[f32], residuals: &[f32], threshold: f32) -> Option<(f64, f32, f32)> {
    let mut left_sum = 0.0f64;
    let mut left_n = 0usize;
    let mut right_sum = 0.0f64;
    let mut right_n = 0usize;

    for (v, r) in column.iter().zip(residuals.iter()) {
        if *v <= threshold {
            left_sum += *r as f64;
            left_n += 1;
        } else {
            right_sum += *r as f64;
            right_n += 1;
        }
    }
    if left_n == 0 || right_n == 0 {
        return None;
    }

    let left_mean = left_sum / left_n as f64;
    let right_mean = right_sum / right_n as f64;

    let mut sse = 0.0f64;
    for (v, r) in column.iter().zip(residuals.iter()) {
        let mean = if *v <= threshold { left_mean } else { right_mean };
        let d = *r as f64 - mean;
        sse += d * d;
    }

    Some((sse, left_mean as f32, right_mean as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    #[test]
    fn boost_learns_a_step_function() {
        // y jumps from 0 to 4 at x = 0.
        let xs: Vec<f32> = (0..50).map(|i| -1.0 + i as f32 / 24.5).collect();
        let ys: Vec<f32> = xs.iter().map(|x| if *x <= 0.0 { 0.0 } else { 4.0 }).collect();
        let x = Array2::from_shape_vec((50, 1), xs).unwrap();
        let y = Array1::from_vec(ys);

        let model = StumpBoost {
            rounds: 60,
            feature_fraction: 1.0,
            ..StumpBoost::default()
        }
        .fit(x.view(), y.view())
        .unwrap();

        assert!(model.predict(&[-0.8]) < 1.0);
        assert!(model.predict(&[0.8]) > 3.0);
    }

    #[test]
    fn split_score_requires_both_sides() {
        let column = [1.0f32, 2.0, 3.0];
        let residuals = [0.5f32, -0.5, 0.0];
        assert!(split_score(&column, &residuals, 0.0).is_none());
        assert!(split_score(&column, &residuals, 1.5).is_some());
    }

    #[test]
    fn quantile_thresholds_dedup_constant_column() {
        assert!(quantile_thresholds(&[2.0, 2.0, 2.0], 4).is_empty());
        let t = quantile_thresholds(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(!t.is_empty());
        assert!(t.iter().all(|v| *v >= 1.0 && *v < 4.0));
    }
}
