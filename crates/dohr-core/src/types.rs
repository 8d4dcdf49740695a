use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Fixed-length face descriptor (128-dimensional for the bundled model).
///
/// Treated as opaque by everything except the matcher: the pipeline only
/// ever compares descriptors by Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another descriptor.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One detected face in a sampled frame. Transient: discarded after the
/// match has been routed.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
}

/// Descriptor set for one enrolled identity. Derived and ephemeral —
/// rebuilt whenever the roster changes, never persisted.
///
/// An identity whose reference photo yielded no descriptor carries an
/// empty set and is unmatchable, which is not an error.
#[derive(Debug, Clone)]
pub struct LabeledDescriptor {
    pub name: String,
    pub descriptors: Vec<Descriptor>,
}

/// Result of matching a probe descriptor against the gallery.
///
/// `distance` is the raw minimum over the whole gallery; `name` is the
/// owner of that minimum. Threshold classification is the caller's job.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub name: Option<String>,
    pub distance: f32,
}

impl MatchResult {
    /// The no-match result an empty gallery produces.
    pub fn unknown() -> Self {
        Self {
            name: None,
            distance: f32::INFINITY,
        }
    }
}

/// An enrolled person. Immutable once enrolled, except for deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    /// Reference photo bytes (JPEG/PNG). Must yield exactly one
    /// extractable descriptor at enrollment time.
    #[serde(skip_serializing, default)]
    pub photo: Vec<u8>,
    /// Track queued on the person's entrance (e.g. "spotify:track:123").
    pub track_uri: String,
    /// Human-readable track label for listings.
    pub track_name: String,
}

/// A recorded entrance: this identity was recognized at the door at this
/// time. At most one per identity per rolling 24-hour window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntranceEvent {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}
