pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extractor;
pub mod model;
pub mod report;
pub mod roster;
pub mod trainer;

pub use error::Error;

// Re-export vision types for convenience
pub use facerank_vision::{face, pipeline, Detection, Embedding, FacePipeline};
