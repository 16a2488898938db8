use std::path::{Path, PathBuf};

use anyhow::Context;
use log::info;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::model::{Candidate, EstimatorSpec, Model, StandardScaler};

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub test_fraction: f32,
    pub seed: u64,
    pub folds: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            folds: 5,
        }
    }
}

/// Held-out metrics for one candidate family.
#[derive(Debug, Clone)]
pub struct CandidateReport {
    pub label: String,
    /// Mean CV error of the chosen grid point, when a grid was searched.
    pub cv_mse: Option<f32>,
    pub test_mse: f32,
    pub test_mae: f32,
}

pub struct TrainingOutcome {
    pub model: Model,
    pub scaler: StandardScaler,
    pub winner: String,
    pub reports: Vec<CandidateReport>,
}

pub fn mean_squared_error(truth: &[f32], pred: &[f32]) -> f32 {
    let n = truth.len().max(1) as f64;
    (truth
        .iter()
        .zip(pred.iter())
        .map(|(t, p)| {
            let d = (*t - *p) as f64;
            d * d
        })
        .sum::<f64>()
        / n) as f32
}

pub fn mean_absolute_error(truth: &[f32], pred: &[f32]) -> f32 {
    let n = truth.len().max(1) as f64;
    (truth
        .iter()
        .zip(pred.iter())
        .map(|(t, p)| ((*t - *p) as f64).abs())
        .sum::<f64>()
        / n) as f32
}

/// Deterministic shuffled split into (train, test) index sets.
pub fn split_indices(n: usize, test_fraction: f32, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let test_count = ((n as f32 * test_fraction).round() as usize).min(n);
    let test = indices[..test_count].to_vec();
    let train = indices[test_count..].to_vec();
    (train, test)
}

/// K contiguous folds over a seeded shuffle; each index lands in exactly one
/// validation fold.
pub fn kfold_indices(n: usize, folds: usize, seed: u64) -> Vec<(Vec<usize>, Vec<usize>)> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let folds = folds.clamp(1, n.max(1));
    let mut out = Vec::with_capacity(folds);
    for fold in 0..folds {
        let lo = fold * n / folds;
        let hi = (fold + 1) * n / folds;
        let val = indices[lo..hi].to_vec();
        let mut train = indices[..lo].to_vec();
        train.extend_from_slice(&indices[hi..]);
        out.push((train, val));
    }
    out
}

fn take_rows(x: ArrayView2<f32>, indices: &[usize]) -> Array2<f32> {
    x.select(Axis(0), indices)
}

fn take_values(y: ArrayView1<f32>, indices: &[usize]) -> Array1<f32> {
    Array1::from_iter(indices.iter().map(|&i| y[i]))
}

/// Pick the grid point with the lowest mean CV error.
fn grid_search(
    candidates: &[Candidate],
    x: ArrayView2<f32>,
    y: ArrayView1<f32>,
    cfg: &TrainConfig,
) -> Result<(usize, f32)> {
    let folds = kfold_indices(x.nrows(), cfg.folds, cfg.seed);

    let mut best: Option<(usize, f32)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let mut total = 0.0f64;
        for (train_idx, val_idx) in &folds {
            let model = candidate.estimator.fit(
                take_rows(x, train_idx).view(),
                take_values(y, train_idx).view(),
            )?;
            let pred = model.predict_batch(take_rows(x, val_idx).view());
            let truth = take_values(y, val_idx);
            total += mean_squared_error(truth.as_slice().unwrap_or(&[]), &pred) as f64;
        }
        let mean = (total / folds.len() as f64) as f32;
        info!("  cv {}: mse {:.6}", candidate.label, mean);
        if best.map(|(_, b)| mean < b).unwrap_or(true) {
            best = Some((i, mean));
        }
    }

    best.context("empty candidate grid").map_err(Error::from)
}

/// Fit every candidate family, grid-searching where a grid exists, and pick
/// the winner by held-out test MSE. The scaler is fitted on the training
/// partition only and reused for everything downstream.
pub fn train(
    x: ArrayView2<f32>,
    y: ArrayView1<f32>,
    specs: &[EstimatorSpec],
    cfg: &TrainConfig,
) -> Result<TrainingOutcome> {
    let n = x.nrows();
    if n < 10 {
        return Err(anyhow::anyhow!("not enough samples to train: {n}").into());
    }
    if specs.is_empty() {
        return Err(anyhow::anyhow!("no estimator candidates supplied").into());
    }

    let (train_idx, test_idx) = split_indices(n, cfg.test_fraction, cfg.seed);
    info!(
        "training on {} samples, holding out {}",
        train_idx.len(),
        test_idx.len()
    );

    let scaler = StandardScaler::fit(take_rows(x, &train_idx).view());
    let x_train = scaler.transform(take_rows(x, &train_idx).view());
    let x_test = scaler.transform(take_rows(x, &test_idx).view());
    let y_train = take_values(y, &train_idx);
    let y_test = take_values(y, &test_idx);

    let mut reports = Vec::with_capacity(specs.len());
    let mut best: Option<(f32, Model, String)> = None;

    for spec in specs {
        let candidates = spec.candidates();
        let (chosen, cv_mse) = if candidates.len() > 1 {
            let (i, mse) = grid_search(&candidates, x_train.view(), y_train.view(), cfg)?;
            (i, Some(mse))
        } else {
            (0, None)
        };
        let candidate = &candidates[chosen];

        let model = candidate
            .estimator
            .fit(x_train.view(), y_train.view())
            .with_context(|| format!("fitting {}", candidate.label))?;

        let pred = model.predict_batch(x_test.view());
        let truth = y_test.as_slice().unwrap_or(&[]);
        let test_mse = mean_squared_error(truth, &pred);
        let test_mae = mean_absolute_error(truth, &pred);

        info!(
            "{}: test mse {:.6}, test mae {:.6}",
            candidate.label, test_mse, test_mae
        );
        reports.push(CandidateReport {
            label: candidate.label.clone(),
            cv_mse,
            test_mse,
            test_mae,
        });

        if best.as_ref().map(|(b, _, _)| test_mse < *b).unwrap_or(true) {
            best = Some((test_mse, model, candidate.label.clone()));
        }
    }

    let (_, model, winner) = best.expect("at least one candidate was fitted");
    info!("selected {winner}");

    Ok(TrainingOutcome {
        model,
        scaler,
        winner,
        reports,
    })
}

/// Persisted model path: `<dir>/<stem>.bin`.
pub fn model_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.bin"))
}

/// The paired scaler sits next to its model: `<dir>/<stem>_scaler.bin`.
pub fn scaler_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}_scaler.bin"))
}

pub fn save_artifacts(
    dir: &Path,
    stem: &str,
    model: &Model,
    scaler: &StandardScaler,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let model_file = model_path(dir, stem);
    let data = postcard::to_allocvec(model).context("encoding model")?;
    std::fs::write(&model_file, data)
        .with_context(|| format!("writing {}", model_file.display()))?;

    let scaler_file = scaler_path(dir, stem);
    let data = postcard::to_allocvec(scaler).context("encoding scaler")?;
    std::fs::write(&scaler_file, data)
        .with_context(|| format!("writing {}", scaler_file.display()))?;

    info!(
        "model saved to {}, scaler to {}",
        model_file.display(),
        scaler_file.display()
    );
    Ok((model_file, scaler_file))
}

/// Load the persisted model and its paired scaler, failing fast when either
/// artifact is missing.
pub fn load_artifacts(dir: &Path, stem: &str) -> Result<(Model, StandardScaler)> {
    let model_file = model_path(dir, stem);
    if !model_file.exists() {
        return Err(Error::model_not_found(model_file));
    }
    let scaler_file = scaler_path(dir, stem);
    if !scaler_file.exists() {
        return Err(Error::model_not_found(scaler_file));
    }

    let data = std::fs::read(&model_file)
        .with_context(|| format!("reading {}", model_file.display()))?;
    let model: Model =
        postcard::from_bytes(&data).with_context(|| format!("decoding {}", model_file.display()))?;

    let data = std::fs::read(&scaler_file)
        .with_context(|| format!("reading {}", scaler_file.display()))?;
    let scaler: StandardScaler = postcard::from_bytes(&data)
        .with_context(|| format!("decoding {}", scaler_file.display()))?;

    Ok((model, scaler))
}
