//! Nearest-neighbor matching of a probe descriptor against the gallery.

use crate::gallery::Gallery;
use crate::types::{Descriptor, MatchResult};

/// A probe closer than this distance to some gallery descriptor is
/// classified as that identity. Calibrated for the bundled embedding
/// model; applied by the detection loop, not by the matcher itself.
pub const MATCH_DISTANCE_THRESHOLD: f32 = 0.6;

/// Strategy for finding the nearest gallery identity to a probe descriptor.
pub trait Matcher: Send + Sync {
    fn nearest(&self, probe: &Descriptor, gallery: &Gallery) -> MatchResult;
}

/// Minimum Euclidean distance over every descriptor of every gallery entry.
///
/// Fully deterministic: identical inputs always yield the identical
/// result. Does not apply any threshold — that stays with the caller so
/// this remains a pure distance computation.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest(&self, probe: &Descriptor, gallery: &Gallery) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.entries.iter().enumerate() {
            // Entries with an empty descriptor set are unmatchable.
            for descriptor in &entry.descriptors {
                let d = probe.distance(descriptor);
                if best.map_or(true, |(_, prev)| d < prev) {
                    best = Some((i, d));
                }
            }
        }

        match best {
            Some((i, distance)) => MatchResult {
                name: Some(gallery.entries[i].name.clone()),
                distance,
            },
            None => MatchResult::unknown(),
        }
    }
}
