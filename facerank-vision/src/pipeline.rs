use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Embedding};

/// Full pipeline: detect faces, pick the most prominent one, align, encode.
pub struct FacePipeline {
    detector: Session,
    encoder: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl FacePipeline {
    pub fn from_model_files(detector_path: &Path, encoder_path: &Path) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(detector_path)?,
            encoder: crate::model::encoder_session(encoder_path)?,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        })
    }

    /// Embed the largest face in the image. `Ok(None)` when no face clears
    /// the detection threshold; the caller decides whether that is an error.
    pub fn embed(&mut self, img: &DynamicImage) -> Result<Option<Embedding>> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;

        let Some(best) = face::largest_detection(&detections) else {
            return Ok(None);
        };

        let aligned =
            face::align_face(img, best, face::ENCODE_SIZE).context("aligning face")?;
        let embedding =
            face::encode_face(&mut self.encoder, &aligned).context("encoding face")?;

        Ok(Some(embedding))
    }
}
