//! Gallery building: roster of identities -> labeled descriptor sets.

use crate::extractor::DescriptorExtractor;
use crate::types::{Identity, LabeledDescriptor};

/// In-memory matching reference for all enrolled identities.
///
/// Rebuilt from scratch whenever the roster changes and on cold start;
/// the builder itself is stateless per call and the caller owns
/// invalidation. Ticks read a published snapshot, never a gallery
/// mid-rebuild.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    pub entries: Vec<LabeledDescriptor>,
}

impl Gallery {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build a gallery from the current roster.
///
/// Per-identity failures (undecodable photo, extraction error, no face
/// in the photo) are logged and leave that identity with an empty
/// descriptor set — unmatchable, never fatal to the whole build.
pub async fn build_gallery(extractor: &dyn DescriptorExtractor, identities: &[Identity]) -> Gallery {
    let mut entries = Vec::with_capacity(identities.len());

    for identity in identities {
        let descriptors = match image::load_from_memory(&identity.photo) {
            Ok(photo) => match extractor.extract(photo).await {
                Ok(detections) => {
                    if detections.is_empty() {
                        tracing::warn!(name = %identity.name, "reference photo yields no face; identity unmatchable");
                    }
                    detections.into_iter().map(|d| d.descriptor).collect()
                }
                Err(err) => {
                    tracing::warn!(name = %identity.name, error = %err, "descriptor extraction failed; identity unmatchable");
                    Vec::new()
                }
            },
            Err(err) => {
                tracing::warn!(name = %identity.name, error = %err, "reference photo undecodable; identity unmatchable");
                Vec::new()
            }
        };

        entries.push(LabeledDescriptor {
            name: identity.name.clone(),
            descriptors,
        });
    }

    tracing::info!(
        identities = entries.len(),
        matchable = entries.iter().filter(|e| !e.descriptors.is_empty()).count(),
        "gallery built"
    );

    Gallery { entries }
}
