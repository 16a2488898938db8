use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use log::info;
use reqwest::blocking::Client;

use facerank_vision::{Embedding, FacePipeline};

use crate::cache::{BuildReport, CacheEntry, ItemFailure};
use crate::config::Config;
use crate::dataset::LabeledSample;
use crate::error::{Error, Result};

/// Where the image bytes come from.
pub enum ImageSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
    Url(&'a str),
}

/// Turns an image source into a face embedding: fetch/read, decode, detect,
/// pick the largest face, encode. No retries; callers catch per-item errors.
pub struct Extractor {
    pipeline: FacePipeline,
    http: Client,
}

impl Extractor {
    pub fn new(cfg: &Config) -> Result<Self> {
        for model in [&cfg.detector_model, &cfg.encoder_model] {
            if !model.exists() {
                return Err(Error::ModelNotFound {
                    path: model.clone(),
                    hint: "configure detector_model/encoder_model to the ONNX weight files"
                        .into(),
                });
            }
        }

        let pipeline = FacePipeline::from_model_files(&cfg.detector_model, &cfg.encoder_model)
            .context("initializing face pipeline")?;
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("building http client")?;

        Ok(Self { pipeline, http })
    }

    pub fn extract(&mut self, identifier: &str, source: ImageSource) -> Result<Embedding> {
        let bytes = match source {
            ImageSource::Bytes(bytes) => bytes.to_vec(),
            ImageSource::Path(path) => std::fs::read(path)
                .with_context(|| format!("reading image {}", path.display()))?,
            ImageSource::Url(url) => self.fetch(url)?,
        };

        let img = image::load_from_memory(&bytes).map_err(|_| Error::Decode {
            source_id: identifier.to_string(),
        })?;

        match self.pipeline.embed(&img)? {
            Some(embedding) => Ok(embedding),
            None => Err(Error::NoFaceDetected {
                source_id: identifier.to_string(),
            }),
        }
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().map_err(|e| Error::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        let bytes = response.bytes().map_err(|e| Error::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    /// Embed every sample, collecting successes and failures explicitly.
    /// A failed sample is dropped from both parallel sequences.
    pub fn embed_all(&mut self, samples: &[LabeledSample]) -> Result<BuildReport> {
        let mut entry: Option<CacheEntry> = None;
        let mut failures = Vec::new();

        for (i, sample) in samples.iter().enumerate() {
            match self.extract(&sample.identifier, ImageSource::Path(&sample.source_path)) {
                Ok(embedding) => {
                    let vector = embedding.as_slice().to_vec();
                    let entry = entry.get_or_insert_with(|| CacheEntry::new(vector.len()));
                    if vector.len() != entry.dim {
                        failures.push(ItemFailure {
                            identifier: sample.identifier.clone(),
                            reason: format!(
                                "embedding dimension {} != {}",
                                vector.len(),
                                entry.dim
                            ),
                        });
                        continue;
                    }
                    entry.push(vector, sample.score);
                }
                Err(e) => failures.push(ItemFailure {
                    identifier: sample.identifier.clone(),
                    reason: e.to_string(),
                }),
            }

            if (i + 1) % 100 == 0 {
                info!("  processed {}/{} images", i + 1, samples.len());
            }
        }

        Ok(BuildReport {
            entry: entry.unwrap_or_else(|| CacheEntry::new(0)),
            failures,
        })
    }
}
