//! The opaque descriptor-extraction capability.

use crate::types::DetectionResult;
use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
    #[error("extractor task aborted")]
    TaskAborted,
}

/// Turns an image into zero or more face descriptors with bounding boxes.
///
/// The embedding algorithm behind this is deliberately unspecified: the
/// pipeline only depends on descriptors of a fixed length being
/// comparable by distance. Backends are swappable.
#[async_trait]
pub trait DescriptorExtractor: Send + Sync {
    async fn extract(&self, image: DynamicImage) -> Result<Vec<DetectionResult>, ExtractorError>;
}
