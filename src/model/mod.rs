pub mod boost;
pub mod mlp;
pub mod ridge;
pub mod scaler;
pub mod svr;

use anyhow::Result;
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

pub use boost::{BoostModel, StumpBoost};
pub use mlp::{MlpModel, MlpRegressor};
pub use ridge::{Ridge, RidgeModel};
pub use scaler::StandardScaler;
pub use svr::{LinearSvr, SvrModel};

/// Anything that can be fitted to (X, y) and yield a persisted model.
pub trait Estimator {
    fn fit(&self, x: ArrayView2<f32>, y: ArrayView1<f32>) -> Result<Model>;
}

impl Estimator for Ridge {
    fn fit(&self, x: ArrayView2<f32>, y: ArrayView1<f32>) -> Result<Model> {
        Ridge::fit(self, x, y)
    }
}

impl Estimator for LinearSvr {
    fn fit(&self, x: ArrayView2<f32>, y: ArrayView1<f32>) -> Result<Model> {
        LinearSvr::fit(self, x, y)
    }
}

impl Estimator for StumpBoost {
    fn fit(&self, x: ArrayView2<f32>, y: ArrayView1<f32>) -> Result<Model> {
        StumpBoost::fit(self, x, y)
    }
}

impl Estimator for MlpRegressor {
    fn fit(&self, x: ArrayView2<f32>, y: ArrayView1<f32>) -> Result<Model> {
        MlpRegressor::fit(self, x, y)
    }
}

/// A fitted model from any estimator family, with a uniform predict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Model {
    Ridge(RidgeModel),
    LinearSvr(SvrModel),
    Boost(BoostModel),
    Mlp(MlpModel),
}

impl Model {
    pub fn predict(&self, features: &[f32]) -> f32 {
        match self {
            Self::Ridge(m) => m.predict(features),
            Self::LinearSvr(m) => m.predict(features),
            Self::Boost(m) => m.predict(features),
            Self::Mlp(m) => m.predict(features),
        }
    }

    pub fn predict_batch(&self, x: ArrayView2<f32>) -> Vec<f32> {
        x.rows()
            .into_iter()
            .map(|row| self.predict(&row.to_vec()))
            .collect()
    }

    pub fn family(&self) -> &'static str {
        match self {
            Self::Ridge(_) => "ridge",
            Self::LinearSvr(_) => "linear-svr",
            Self::Boost(_) => "stump-boost",
            Self::Mlp(_) => "mlp",
        }
    }
}

/// One hyperparameter point, ready to fit.
pub struct Candidate {
    pub label: String,
    pub estimator: Box<dyn Estimator>,
}

/// An estimator family plus its (finite) hyperparameter grid.
#[derive(Debug, Clone)]
pub enum EstimatorSpec {
    Ridge { alphas: Vec<f32> },
    LinearSvr { c_grid: Vec<f32>, epsilon: f32 },
    Boost(StumpBoost),
    Mlp(MlpRegressor),
}

impl EstimatorSpec {
    /// The candidate set trained by default, mirroring the experiment
    /// lineup: ridge, SVR, boosted trees, and a small neural net.
    pub fn default_candidates() -> Vec<EstimatorSpec> {
        vec![
            EstimatorSpec::Ridge {
                alphas: vec![0.1, 1.0, 10.0],
            },
            EstimatorSpec::LinearSvr {
                c_grid: vec![0.1, 1.0, 10.0],
                epsilon: 0.1,
            },
            EstimatorSpec::Boost(StumpBoost::default()),
            EstimatorSpec::Mlp(MlpRegressor::default()),
        ]
    }

    pub fn family(&self) -> &'static str {
        match self {
            Self::Ridge { .. } => "ridge",
            Self::LinearSvr { .. } => "linear-svr",
            Self::Boost(_) => "stump-boost",
            Self::Mlp(_) => "mlp",
        }
    }

    /// Expand the grid into concrete candidates.
    pub fn candidates(&self) -> Vec<Candidate> {
        match self {
            Self::Ridge { alphas } => alphas
                .iter()
                .map(|&alpha| Candidate {
                    label: format!("ridge(alpha={alpha})"),
                    estimator: Box::new(Ridge { alpha }),
                })
                .collect(),
            Self::LinearSvr { c_grid, epsilon } => c_grid
                .iter()
                .map(|&c| Candidate {
                    label: format!("linear-svr(C={c})"),
                    estimator: Box::new(LinearSvr {
                        c,
                        epsilon: *epsilon,
                        ..LinearSvr::default()
                    }),
                })
                .collect(),
            Self::Boost(spec) => vec![Candidate {
                label: format!("stump-boost(rounds={})", spec.rounds),
                estimator: Box::new(spec.clone()),
            }],
            Self::Mlp(spec) => vec![Candidate {
                label: format!("mlp(hidden={})", spec.hidden),
                estimator: Box::new(spec.clone()),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_candidates_cover_all_families() {
        let specs = EstimatorSpec::default_candidates();
        let families: Vec<&str> = specs.iter().map(|s| s.family()).collect();
        assert_eq!(families, ["ridge", "linear-svr", "stump-boost", "mlp"]);
    }

    #[test]
    fn grids_expand_per_parameter_point() {
        let spec = EstimatorSpec::Ridge {
            alphas: vec![0.1, 1.0, 10.0],
        };
        assert_eq!(spec.candidates().len(), 3);

        let spec = EstimatorSpec::Boost(StumpBoost::default());
        assert_eq!(spec.candidates().len(), 1);
    }

    #[test]
    fn model_roundtrips_through_postcard() {
        let model = Model::Ridge(RidgeModel {
            weights: vec![0.5, -0.25],
            intercept: 1.0,
        });
        let data = postcard::to_allocvec(&model).unwrap();
        let back: Model = postcard::from_bytes(&data).unwrap();
        assert_eq!(model, back);
        assert_eq!(back.predict(&[2.0, 4.0]), model.predict(&[2.0, 4.0]));
    }
}
