use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dataset::SubjectFilter;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACERANK_CONFIG_PATH").unwrap_or("/usr/local/etc/facerank/config.toml"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Labeled dataset root: `labels.txt` plus an `Images/` directory.
    pub labels_dir: PathBuf,
    /// Rated dataset root: `face_ratings.csv`, `face_info.csv` and a
    /// `neutral-front/` directory.
    pub ratings_dir: PathBuf,
    /// Where embedding caches and trained artifacts live.
    pub cache_dir: PathBuf,
    /// Where league/stats reports are written.
    pub reports_dir: PathBuf,

    /// ONNX weight files for the vision pipeline.
    pub detector_model: PathBuf,
    pub encoder_model: PathBuf,

    /// Base filename for the persisted model; the paired scaler is stored
    /// next to it as `<stem>_scaler.bin`.
    pub model_stem: String,
    /// Restrict training data to one demographic subgroup.
    pub subject_filter: Option<SubjectFilter>,
    /// Rebuild the embedding cache even when a cache file exists.
    pub regenerate_embeddings: bool,

    /// Roster API.
    pub api_base: String,
    pub season: String,
    pub standings_file: PathBuf,
    pub request_timeout_secs: u64,
    /// Fixed pause between consecutive API calls, to stay under the
    /// (unpublished) third-party rate limit.
    pub request_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            labels_dir: PathBuf::from("scut-data"),
            ratings_dir: PathBuf::from("london-data"),
            cache_dir: PathBuf::from("cached-models"),
            reports_dir: PathBuf::from("players"),
            detector_model: PathBuf::from("models/face_detection.onnx"),
            encoder_model: PathBuf::from("models/face_recognition.onnx"),
            model_stem: "beauty_score_model".to_string(),
            subject_filter: None,
            regenerate_embeddings: false,
            api_base: "https://api-web.nhle.com/v1".to_string(),
            season: "20252026".to_string(),
            standings_file: PathBuf::from("nhle/league-standings.json"),
            request_timeout_secs: 10,
            request_delay_secs: 1,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrips_through_toml() {
        let mut cfg = Config::default();
        cfg.subject_filter = Some(SubjectFilter::Male);
        cfg.model_stem = "beauty_score_model_male".into();

        let raw = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.model_stem, "beauty_score_model_male");
        assert_eq!(back.subject_filter, Some(SubjectFilter::Male));
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let cfg = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap();
        assert_eq!(cfg.season, "20252026");
        assert!(cfg.subject_filter.is_none());
    }
}
