use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the pipeline.
///
/// Per-item variants (`Fetch`, `Decode`, `NoFaceDetected`) are caught at batch
/// iteration boundaries and logged; missing-prerequisite variants
/// (`SourceNotFound`, `ModelNotFound`) propagate immediately.
#[derive(Debug, Error)]
pub enum Error {
    #[error("fetching {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("could not decode image bytes for {source_id}")]
    Decode { source_id: String },

    #[error("no face detected in {source_id}")]
    NoFaceDetected { source_id: String },

    #[error("source file not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("model artifact not found: {} ({hint})", path.display())]
    ModelNotFound { path: PathBuf, hint: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn model_not_found(path: PathBuf) -> Self {
        Self::ModelNotFound {
            path,
            hint: "run `facerank train` first".into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
