//! dohr-core — Face descriptor extraction, gallery building and matching.
//!
//! The descriptor extractor is an opaque capability (`image -> descriptors`);
//! the bundled implementation runs a detection and an embedding model via
//! ONNX Runtime, but any backend producing fixed-length descriptors can be
//! swapped in without touching the pipeline.

pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod onnx;
pub mod types;

pub use extractor::{DescriptorExtractor, ExtractorError};
pub use gallery::{build_gallery, Gallery};
pub use matcher::{EuclideanMatcher, Matcher, MATCH_DISTANCE_THRESHOLD};
pub use onnx::OnnxExtractor;
pub use types::{BoundingBox, Descriptor, DetectionResult, EntranceEvent, Identity, LabeledDescriptor, MatchResult};
