//! Roster snapshots, gallery rebuilds and enrollment.
//!
//! The detection loop never reads the store directly for matching: it
//! reads the latest published [`RosterSnapshot`] from a watch channel.
//! A rebuild task re-derives the snapshot whenever the roster-changed
//! signal fires, so ticks always see a consistent gallery — published by
//! pointer swap, never mutated in place.

use dohr_core::{build_gallery, DescriptorExtractor, ExtractorError, Gallery, Identity};
use dohr_store::{Store, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Notify};

/// Consistent view of the enrolled roster for one or more ticks.
#[derive(Default)]
pub struct RosterSnapshot {
    pub gallery: Gallery,
    /// Identity lookup for the side-effect fan-out, keyed by name.
    pub identities: HashMap<String, Identity>,
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("photo undecodable: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no extractable face in the reference photo")]
    NoFace,
    #[error("reference photo contains {0} faces; exactly one required")]
    MultipleFaces(usize),
    #[error(transparent)]
    Extract(#[from] ExtractorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Enroll a new identity.
///
/// Hard precondition: the reference photo must yield exactly one
/// extractable descriptor. The caller fires the roster-changed signal
/// after a successful enrollment.
pub async fn enroll(
    store: &Store,
    extractor: &dyn DescriptorExtractor,
    name: String,
    photo: Vec<u8>,
    track_uri: String,
    track_name: String,
) -> Result<Identity, EnrollError> {
    let image = image::load_from_memory(&photo)?;
    let detections = extractor.extract(image).await?;

    match detections.len() {
        0 => Err(EnrollError::NoFace),
        1 => Ok(store.add_identity(name, photo, track_uri, track_name).await?),
        n => Err(EnrollError::MultipleFaces(n)),
    }
}

/// Build one snapshot from the current roster.
async fn build_snapshot(
    store: &Store,
    extractor: &dyn DescriptorExtractor,
) -> Result<RosterSnapshot, StoreError> {
    let roster = store.list_identities().await?;
    let gallery = build_gallery(extractor, &roster).await;
    let identities = roster.into_iter().map(|i| (i.name.clone(), i)).collect();
    Ok(RosterSnapshot { gallery, identities })
}

/// Rebuild-and-publish loop. Builds once at startup, then again on every
/// roster-changed signal. A failed rebuild keeps the previous snapshot.
pub async fn run_roster_task(
    store: Store,
    extractor: Arc<dyn DescriptorExtractor>,
    changed: Arc<Notify>,
    tx: watch::Sender<Arc<RosterSnapshot>>,
) {
    loop {
        match build_snapshot(&store, extractor.as_ref()).await {
            Ok(snapshot) => {
                tx.send_replace(Arc::new(snapshot));
            }
            Err(err) => {
                tracing::warn!(error = %err, "roster snapshot rebuild failed; keeping previous");
            }
        }
        changed.notified().await;
        tracing::debug!("roster changed; rebuilding gallery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dohr_core::{BoundingBox, Descriptor, DetectionResult};
    use image::DynamicImage;

    /// Yields a fixed number of faces per image.
    struct FixedFaces(usize);

    #[async_trait]
    impl DescriptorExtractor for FixedFaces {
        async fn extract(&self, _image: DynamicImage) -> Result<Vec<DetectionResult>, ExtractorError> {
            Ok((0..self.0)
                .map(|i| DetectionResult {
                    bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 0.9 },
                    descriptor: Descriptor::new(vec![i as f32]),
                })
                .collect())
        }
    }

    fn tiny_png() -> Vec<u8> {
        let img = DynamicImage::new_rgb8(4, 4);
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn test_enroll_requires_exactly_one_face() {
        let store = Store::open_in_memory().await.unwrap();

        let none = enroll(&store, &FixedFaces(0), "Ada".into(), tiny_png(), "uri".into(), "t".into()).await;
        assert!(matches!(none, Err(EnrollError::NoFace)));

        let two = enroll(&store, &FixedFaces(2), "Ada".into(), tiny_png(), "uri".into(), "t".into()).await;
        assert!(matches!(two, Err(EnrollError::MultipleFaces(2))));

        let one = enroll(&store, &FixedFaces(1), "Ada".into(), tiny_png(), "uri".into(), "t".into()).await;
        assert_eq!(one.unwrap().name, "Ada");
        assert_eq!(store.list_identities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enroll_rejects_garbage_photo() {
        let store = Store::open_in_memory().await.unwrap();
        let result = enroll(&store, &FixedFaces(1), "Ada".into(), vec![0xBA, 0xD0], "uri".into(), "t".into()).await;
        assert!(matches!(result, Err(EnrollError::Decode(_))));
        assert!(store.list_identities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_roster_task_republishes_on_signal() {
        let store = Store::open_in_memory().await.unwrap();
        let changed = Arc::new(Notify::new());
        let (tx, mut rx) = watch::channel(Arc::new(RosterSnapshot::default()));

        let task = tokio::spawn(run_roster_task(
            store.clone(),
            Arc::new(FixedFaces(1)),
            changed.clone(),
            tx,
        ));

        // Initial build: empty roster
        rx.changed().await.unwrap();
        assert!(rx.borrow().gallery.is_empty());

        enroll(&store, &FixedFaces(1), "Ada".into(), tiny_png(), "uri".into(), "t".into())
            .await
            .unwrap();
        changed.notify_one();

        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.gallery.len(), 1);
        assert_eq!(snapshot.gallery.entries[0].name, "Ada");
        assert!(snapshot.identities.contains_key("Ada"));

        task.abort();
    }
}
