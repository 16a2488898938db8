use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};

/// The unified beauty-score range all datasets are normalized into.
pub const CANONICAL_SCALE: ScoreScale = ScoreScale { min: 1.0, max: 5.0 };
/// Native range of the ratings table.
pub const RATINGS_SCALE: ScoreScale = ScoreScale { min: 1.0, max: 7.0 };

pub const LABELS_FILE: &str = "labels.txt";
pub const LABELS_IMAGES_DIR: &str = "Images";
pub const RATINGS_FILE: &str = "face_ratings.csv";
pub const RATINGS_META_FILE: &str = "face_info.csv";
pub const RATINGS_IMAGES_DIR: &str = "neutral-front";
/// Rated photos come in several poses; the pipeline uses the neutral
/// front-facing shot.
const RATINGS_IMAGE_SUFFIX: &str = "_03.jpg";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreScale {
    pub min: f32,
    pub max: f32,
}

/// Linear rescale of `raw` from `src` onto `dst`.
pub fn rescale(raw: f32, src: ScoreScale, dst: ScoreScale) -> f32 {
    (raw - src.min) * (dst.max - dst.min) / (src.max - src.min) + dst.min
}

/// One labeled image: identifier, canonical-scale score, and where the image
/// bytes live. Loaders never read the bytes themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub identifier: String,
    pub score: f32,
    pub source_path: PathBuf,
}

/// Demographic subgroup restriction, applied before path construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectFilter {
    Male,
    Female,
}

impl SubjectFilter {
    /// Label-file images follow a two-letter prefix convention where the
    /// second letter carries the gender (e.g. `AM..`/`CM..` vs `AF..`/`CF..`).
    fn matches_prefix(&self, filename: &str) -> bool {
        let Some(second) = filename.chars().nth(1) else {
            return false;
        };
        match self {
            Self::Male => second == 'M' || second == 'm',
            Self::Female => second == 'F' || second == 'f',
        }
    }

    fn matches_label(&self, label: &str) -> bool {
        let label = label.trim().to_ascii_lowercase();
        match self {
            Self::Male => label == "male" || label == "m",
            Self::Female => label == "female" || label == "f",
        }
    }
}

impl fmt::Display for SubjectFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Male => write!(f, "male"),
            Self::Female => write!(f, "female"),
        }
    }
}

fn split_label_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some((name, score)) = line.split_once(',') {
        return Some((name.trim(), score.trim()));
    }
    let mut parts = line.split_whitespace();
    Some((parts.next()?, parts.next()?))
}

/// Load the `<filename> <score>` label file under `dir`.
///
/// Scores here are already on the canonical scale and are taken as-is.
pub fn load_labels(dir: &Path, filter: Option<SubjectFilter>) -> Result<Vec<LabeledSample>> {
    let labels_path = dir.join(LABELS_FILE);
    if !labels_path.exists() {
        return Err(Error::SourceNotFound { path: labels_path });
    }
    let images_dir = dir.join(LABELS_IMAGES_DIR);

    let raw = std::fs::read_to_string(&labels_path)
        .with_context(|| format!("reading {}", labels_path.display()))?;

    let mut samples = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let Some((filename, raw_score)) = split_label_line(line) else {
            continue;
        };
        if let Some(f) = filter {
            if !f.matches_prefix(filename) {
                continue;
            }
        }
        let score: f32 = raw_score.parse().with_context(|| {
            format!("bad score on line {} of {}", lineno + 1, labels_path.display())
        })?;
        samples.push(LabeledSample {
            identifier: filename.to_string(),
            score,
            source_path: images_dir.join(filename),
        });
    }

    info!("loaded {} labeled samples from {}", samples.len(), labels_path.display());
    Ok(samples)
}

/// Normalized join key: the zero-padded numeric substring of an identifier.
fn numeric_key(identifier: &str) -> Option<String> {
    let digits: String = identifier.chars().filter(|c| c.is_ascii_digit()).collect();
    let n: u32 = digits.parse().ok()?;
    Some(format!("{n:03}"))
}

/// Photo id -> gender label, from the side metadata table.
fn load_ratings_metadata(dir: &Path) -> Result<HashMap<String, String>> {
    let meta_path = dir.join(RATINGS_META_FILE);
    if !meta_path.exists() {
        return Err(Error::SourceNotFound { path: meta_path });
    }

    let mut reader = csv::Reader::from_path(&meta_path)
        .with_context(|| format!("opening {}", meta_path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("reading headers of {}", meta_path.display()))?
        .clone();

    let id_col = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("face_id"))
        .context("metadata table has no face_id column")?;
    let gender_col = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("gender"))
        .context("metadata table has no gender column")?;

    let mut map = HashMap::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", meta_path.display()))?;
        let (Some(id), Some(gender)) = (record.get(id_col), record.get(gender_col)) else {
            continue;
        };
        if let Some(key) = numeric_key(id) {
            map.insert(key, gender.to_string());
        }
    }
    Ok(map)
}

/// Load the wide ratings CSV under `dir`: the first three columns are rater
/// metadata, every following `X###` column is one photo. Ratings are averaged
/// per photo and rescaled from the 1-7 source scale to canonical 1-5.
pub fn load_ratings(dir: &Path, filter: Option<SubjectFilter>) -> Result<Vec<LabeledSample>> {
    let ratings_path = dir.join(RATINGS_FILE);
    if !ratings_path.exists() {
        return Err(Error::SourceNotFound { path: ratings_path });
    }

    let metadata = match filter {
        Some(_) => Some(load_ratings_metadata(dir)?),
        None => None,
    };

    let mut reader = csv::Reader::from_path(&ratings_path)
        .with_context(|| format!("opening {}", ratings_path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("reading headers of {}", ratings_path.display()))?
        .clone();

    // Photo columns start after the three rater columns.
    let photo_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .skip(3)
        .filter(|(_, name)| name.starts_with('X'))
        .map(|(i, name)| (i, name.to_string()))
        .collect();

    // Filter before touching paths, via the metadata join.
    let kept: Vec<(usize, String)> = match (filter, &metadata) {
        (Some(f), Some(meta)) => photo_cols
            .into_iter()
            .filter(|(_, name)| {
                numeric_key(name)
                    .and_then(|key| meta.get(&key))
                    .map(|gender| f.matches_label(gender))
                    .unwrap_or(false)
            })
            .collect(),
        _ => photo_cols,
    };

    let mut sums = vec![0.0f64; kept.len()];
    let mut counts = vec![0usize; kept.len()];
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", ratings_path.display()))?;
        for (slot, (col, _)) in kept.iter().enumerate() {
            if let Some(value) = record.get(*col).and_then(|v| v.trim().parse::<f64>().ok()) {
                sums[slot] += value;
                counts[slot] += 1;
            }
        }
    }

    let images_dir = dir.join(RATINGS_IMAGES_DIR);
    let mut samples = Vec::new();
    for (slot, (_, name)) in kept.iter().enumerate() {
        if counts[slot] == 0 {
            continue;
        }
        let avg = (sums[slot] / counts[slot] as f64) as f32;
        samples.push(LabeledSample {
            identifier: name.clone(),
            score: rescale(avg, RATINGS_SCALE, CANONICAL_SCALE),
            source_path: images_dir.join(format!("{name}{RATINGS_IMAGE_SUFFIX}")),
        });
    }

    info!("loaded {} rated samples from {}", samples.len(), ratings_path.display());
    Ok(samples)
}

/// The combined training set: labeled plus rated samples, all canonical.
pub fn load_training_set(cfg: &Config) -> Result<Vec<LabeledSample>> {
    let mut samples = load_labels(&cfg.labels_dir, cfg.subject_filter)?;
    let rated = load_ratings(&cfg.ratings_dir, cfg.subject_filter)?;
    info!(
        "combined dataset: {} labeled + {} rated = {} samples",
        samples.len(),
        rated.len(),
        samples.len() + rated.len()
    );
    samples.extend(rated);
    Ok(samples)
}
