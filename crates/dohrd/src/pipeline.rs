//! The detection loop: a periodic sampler over the door-facing feed.
//!
//! One timer drives everything. Each tick captures a frame, extracts
//! descriptors, matches them against the current roster snapshot, and
//! routes known faces through the entrance registry into the side-effect
//! fan-out. Ticks are serialized structurally: a semaphore of size one is
//! the overlap guard, so two ticks can never both observe "no entrance
//! yet today" for the same identity. Each tick also runs under a hard
//! timeout so a hung downstream call cannot hold the guard forever.

use crate::roster::RosterSnapshot;
use async_trait::async_trait;
use chrono::Utc;
use dohr_core::{DescriptorExtractor, EuclideanMatcher, ExtractorError, Matcher};
use dohr_effects::Orchestrator;
use dohr_hw::Camera;
use dohr_store::{Store, StoreError};
use image::DynamicImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};

/// Operator-controlled pause flag, read at the top of every tick.
///
/// Toggling never aborts an in-flight tick; it only stops the next one
/// from starting. No automatic timeout.
#[derive(Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn new(paused: bool) -> Self {
        Self(Arc::new(AtomicBool::new(paused)))
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::Relaxed);
    }
}

/// Source of sampled frames. The production impl is the V4L2 camera;
/// tests substitute stubs. `Ok(None)` means no usable frame this tick
/// (e.g. the feed is dark), which is not an error.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> anyhow::Result<Option<DynamicImage>>;
}

/// Camera-backed frame source. Capture is blocking V4L2 I/O, so it runs
/// on the blocking pool. Frames below the luma floor are discarded
/// before they reach the extractor.
pub struct CameraSource {
    camera: Arc<StdMutex<Camera>>,
    min_luma: f32,
}

impl CameraSource {
    pub fn new(camera: Camera, min_luma: f32) -> Self {
        Self {
            camera: Arc::new(StdMutex::new(camera)),
            min_luma,
        }
    }
}

#[async_trait]
impl FrameSource for CameraSource {
    async fn capture(&self) -> anyhow::Result<Option<DynamicImage>> {
        let camera = Arc::clone(&self.camera);
        let frame = tokio::task::spawn_blocking(move || {
            let camera = camera
                .lock()
                .map_err(|_| anyhow::anyhow!("camera handle poisoned"))?;
            camera.capture_frame().map_err(anyhow::Error::from)
        })
        .await??;

        if frame.is_dark(self.min_luma) {
            tracing::trace!(avg_luma = frame.avg_luma(), "frame too dark; skipping");
            return Ok(None);
        }

        frame
            .to_image()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("frame buffer does not match negotiated dimensions"))
    }
}

#[derive(Error, Debug)]
enum TickError {
    #[error("frame capture failed: {0}")]
    Capture(anyhow::Error),
    #[error("descriptor extraction failed: {0}")]
    Extract(#[from] ExtractorError),
    // Registry unreachable: fail closed, no entrance is assumed registered.
    #[error("entrance registry failed: {0}")]
    Registry(#[from] StoreError),
}

pub struct PipelineConfig {
    pub tick_interval: Duration,
    pub tick_timeout: Duration,
    pub match_threshold: f32,
    pub dedup_window: chrono::Duration,
    pub unknown_cooldown: Duration,
}

/// One detection pipeline instance per monitored feed.
pub struct Pipeline {
    cfg: PipelineConfig,
    frames: Arc<dyn FrameSource>,
    extractor: Arc<dyn DescriptorExtractor>,
    matcher: Box<dyn Matcher>,
    store: Store,
    orchestrator: Arc<Orchestrator>,
    snapshot: watch::Receiver<Arc<RosterSnapshot>>,
    pause: PauseFlag,
    in_flight: Arc<Semaphore>,
    last_unknown_cue: tokio::sync::Mutex<Option<Instant>>,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        frames: Arc<dyn FrameSource>,
        extractor: Arc<dyn DescriptorExtractor>,
        store: Store,
        orchestrator: Arc<Orchestrator>,
        snapshot: watch::Receiver<Arc<RosterSnapshot>>,
        pause: PauseFlag,
    ) -> Self {
        Self {
            cfg,
            frames,
            extractor,
            matcher: Box::new(EuclideanMatcher),
            store,
            orchestrator,
            snapshot,
            pause,
            in_flight: Arc::new(Semaphore::new(1)),
            last_unknown_cue: tokio::sync::Mutex::new(None),
        }
    }

    /// Swap the matching strategy. The default is Euclidean
    /// nearest-descriptor.
    pub fn with_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Start the tick scheduler. Runs until the returned task is aborted.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::new(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pipeline.cfg.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_ms = pipeline.cfg.tick_interval.as_millis() as u64,
                "detection loop started"
            );

            loop {
                interval.tick().await;

                // Overlap guard: if the previous tick's chain is still
                // unresolved, this tick is skipped, not queued.
                let Ok(permit) = Arc::clone(&pipeline.in_flight).try_acquire_owned() else {
                    tracing::trace!("previous tick in flight; skipping");
                    continue;
                };

                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    let _permit = permit;
                    match tokio::time::timeout(pipeline.cfg.tick_timeout, pipeline.run_tick()).await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => tracing::warn!(error = %err, "tick abandoned"),
                        Err(_) => tracing::warn!(
                            timeout_secs = pipeline.cfg.tick_timeout.as_secs(),
                            "tick timed out; releasing overlap guard"
                        ),
                    }
                });
            }
        })
    }

    async fn run_tick(&self) -> Result<(), TickError> {
        if self.pause.is_paused() {
            tracing::trace!("paused; tick skipped");
            return Ok(());
        }

        let Some(frame) = self.frames.capture().await.map_err(TickError::Capture)? else {
            return Ok(());
        };
        let detections = self.extractor.extract(frame).await?;
        if detections.is_empty() {
            return Ok(());
        }

        let snapshot = self.snapshot.borrow().clone();

        for detection in detections {
            let result = self.matcher.nearest(&detection.descriptor, &snapshot.gallery);
            let known = result
                .name
                .as_deref()
                .filter(|_| result.distance < self.cfg.match_threshold);

            match known {
                Some(name) => self.handle_known(name, result.distance, &snapshot).await?,
                None => {
                    tracing::debug!(distance = result.distance, "unrecognized face");
                    self.unknown_cue().await;
                }
            }
        }

        Ok(())
    }

    async fn handle_known(
        &self,
        name: &str,
        distance: f32,
        snapshot: &RosterSnapshot,
    ) -> Result<(), TickError> {
        let registration = self
            .store
            .register_entrance_if_absent(name, Utc::now(), self.cfg.dedup_window)
            .await?;

        if !registration.is_new {
            tracing::debug!(name, "already entered within the window; no side effects");
            return Ok(());
        }

        tracing::info!(name, distance, "new entrance registered");
        match snapshot.identities.get(name) {
            Some(identity) => self.orchestrator.announce_entrance(identity).await,
            // Identity removed between snapshot build and now; the
            // entrance row stands, the fan-out has nothing to announce.
            None => tracing::warn!(name, "entrance registered for identity missing from snapshot"),
        }
        Ok(())
    }

    /// Unknown-visitor cue, rate limited so a person lingering in frame
    /// does not produce a notification storm.
    async fn unknown_cue(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_unknown_cue.lock().await;
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.cfg.unknown_cooldown {
                    tracing::trace!("unknown cue suppressed by cooldown");
                    return;
                }
            }
            *last = Some(now);
        }
        self.orchestrator.announce_unknown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dohr_core::{
        BoundingBox, Descriptor, DetectionResult, Gallery, Identity, LabeledDescriptor, MatchResult,
    };
    use dohr_effects::{EffectError, Notifier};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    struct StubFrames;

    #[async_trait]
    impl FrameSource for StubFrames {
        async fn capture(&self) -> anyhow::Result<Option<DynamicImage>> {
            Ok(Some(DynamicImage::new_rgb8(8, 8)))
        }
    }

    /// Frame source with no usable frames (dark feed).
    struct DarkFrames;

    #[async_trait]
    impl FrameSource for DarkFrames {
        async fn capture(&self) -> anyhow::Result<Option<DynamicImage>> {
            Ok(None)
        }
    }

    /// Frame source whose every capture fails.
    struct BrokenFrames {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl FrameSource for BrokenFrames {
        async fn capture(&self) -> anyhow::Result<Option<DynamicImage>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("device unplugged"))
        }
    }

    /// Extractor that sleeps, counts concurrent invocations, and returns
    /// a fixed descriptor set.
    struct SlowExtractor {
        delay: Duration,
        detections: Vec<Vec<f32>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        started: AtomicUsize,
        completed: AtomicUsize,
    }

    impl SlowExtractor {
        fn new(delay: Duration, detections: Vec<Vec<f32>>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                detections,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DescriptorExtractor for SlowExtractor {
        async fn extract(&self, _image: DynamicImage) -> Result<Vec<DetectionResult>, ExtractorError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);

            Ok(self
                .detections
                .iter()
                .map(|values| DetectionResult {
                    bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 0.9 },
                    descriptor: Descriptor::new(values.clone()),
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn channel(&self) -> &'static str {
            "test"
        }

        async fn send(&self, message: &str) -> Result<(), EffectError> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            tick_interval: Duration::from_millis(300),
            tick_timeout: Duration::from_secs(30),
            match_threshold: 0.6,
            dedup_window: chrono::Duration::hours(24),
            unknown_cooldown: Duration::from_secs(60),
        }
    }

    fn ada_snapshot() -> Arc<RosterSnapshot> {
        let ada = Identity {
            id: "1".into(),
            name: "Ada".into(),
            photo: vec![],
            track_uri: "spotify:track:123".into(),
            track_name: "Homework".into(),
        };
        Arc::new(RosterSnapshot {
            gallery: Gallery {
                entries: vec![LabeledDescriptor {
                    name: "Ada".into(),
                    descriptors: vec![Descriptor::new(vec![0.0])],
                }],
            },
            identities: HashMap::from([("Ada".to_string(), ada)]),
        })
    }

    async fn pipeline_with(
        cfg: PipelineConfig,
        frames: Arc<dyn FrameSource>,
        extractor: Arc<dyn DescriptorExtractor>,
        orchestrator: Orchestrator,
        snapshot: Arc<RosterSnapshot>,
        pause: PauseFlag,
    ) -> (Pipeline, Store) {
        let store = Store::open_in_memory().await.unwrap();
        let (_tx, rx) = watch::channel(snapshot);
        let pipeline = Pipeline::new(
            cfg,
            frames,
            extractor,
            store.clone(),
            Arc::new(orchestrator),
            rx,
            pause,
        );
        (pipeline, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_never_overlap() {
        // Extraction takes 1s against a 300ms tick interval.
        let extractor = SlowExtractor::new(Duration::from_secs(1), vec![]);
        let (pipeline, _store) = pipeline_with(
            config(),
            Arc::new(StubFrames),
            extractor.clone(),
            Orchestrator::new(),
            Arc::new(RosterSnapshot::default()),
            PauseFlag::default(),
        )
        .await;

        let task = pipeline.spawn();
        tokio::time::sleep(Duration::from_secs(5)).await;
        task.abort();

        assert!(extractor.started.load(Ordering::SeqCst) >= 2);
        assert_eq!(extractor.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_tick_does_not_extract() {
        let extractor = SlowExtractor::new(Duration::from_millis(1), vec![]);
        let (pipeline, _store) = pipeline_with(
            config(),
            Arc::new(StubFrames),
            extractor.clone(),
            Orchestrator::new(),
            Arc::new(RosterSnapshot::default()),
            PauseFlag::new(true),
        )
        .await;

        let task = pipeline.spawn();
        tokio::time::sleep(Duration::from_secs(3)).await;
        task.abort();

        assert_eq!(extractor.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_mid_tick_finishes_in_flight_only() {
        let extractor = SlowExtractor::new(Duration::from_secs(1), vec![]);
        let pause = PauseFlag::default();
        let (pipeline, _store) = pipeline_with(
            config(),
            Arc::new(StubFrames),
            extractor.clone(),
            Orchestrator::new(),
            Arc::new(RosterSnapshot::default()),
            pause.clone(),
        )
        .await;

        let task = pipeline.spawn();

        // Let the first tick start, then pause while it is in flight.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(extractor.started.load(Ordering::SeqCst), 1);
        pause.set(true);

        tokio::time::sleep(Duration::from_secs(5)).await;
        task.abort();

        // The in-flight tick ran to completion; no new extraction began.
        assert_eq!(extractor.completed.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_face_registers_once_and_fans_out_once() {
        // Probe at distance 0.3 from Ada's gallery descriptor.
        let extractor = SlowExtractor::new(Duration::from_millis(1), vec![vec![0.3]]);
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Orchestrator::new().with_notifier(notifier.clone());

        let (pipeline, store) = pipeline_with(
            config(),
            Arc::new(StubFrames),
            extractor.clone(),
            orchestrator,
            ada_snapshot(),
            PauseFlag::default(),
        )
        .await;

        let task = pipeline.spawn();
        tokio::time::sleep(Duration::from_secs(3)).await;
        task.abort();

        // Many ticks saw Ada; only the first created an event and fanned out.
        assert!(extractor.completed.load(Ordering::SeqCst) >= 2);
        let events = store
            .entrances_within(Utc::now(), chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Ada");
        assert_eq!(
            notifier.messages.lock().unwrap().as_slice(),
            ["Ada is in the building!"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_above_threshold_is_unknown_with_cooldown() {
        // Probe at distance 0.8: above threshold, never registered.
        let extractor = SlowExtractor::new(Duration::from_millis(1), vec![vec![0.8]]);
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Orchestrator::new().with_notifier(notifier.clone());

        let (pipeline, store) = pipeline_with(
            config(),
            Arc::new(StubFrames),
            extractor.clone(),
            orchestrator,
            ada_snapshot(),
            PauseFlag::default(),
        )
        .await;

        let task = pipeline.spawn();
        // ~10 detections within the 60s cooldown window
        tokio::time::sleep(Duration::from_secs(3)).await;
        task.abort();

        assert!(extractor.completed.load(Ordering::SeqCst) >= 10);
        assert!(store
            .entrances_within(Utc::now(), chrono::Duration::hours(24))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            notifier.messages.lock().unwrap().as_slice(),
            ["Unknown person at the door"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_cue_fires_again_after_cooldown() {
        let extractor = SlowExtractor::new(Duration::from_millis(1), vec![vec![0.8]]);
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Orchestrator::new().with_notifier(notifier.clone());

        let (pipeline, _store) = pipeline_with(
            config(),
            Arc::new(StubFrames),
            extractor.clone(),
            orchestrator,
            ada_snapshot(),
            PauseFlag::default(),
        )
        .await;

        let task = pipeline.spawn();
        tokio::time::sleep(Duration::from_secs(61)).await;
        task.abort();

        assert_eq!(notifier.messages.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_tick_releases_guard() {
        // Extraction hangs far beyond the tick timeout; the guard must
        // come back so later ticks can still extract.
        let mut cfg = config();
        cfg.tick_timeout = Duration::from_millis(200);
        let extractor = SlowExtractor::new(Duration::from_secs(3600), vec![]);
        let (pipeline, _store) = pipeline_with(
            cfg,
            Arc::new(StubFrames),
            extractor.clone(),
            Orchestrator::new(),
            Arc::new(RosterSnapshot::default()),
            PauseFlag::default(),
        )
        .await;

        let task = pipeline.spawn();
        tokio::time::sleep(Duration::from_secs(2)).await;
        task.abort();

        assert!(extractor.started.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_abandons_tick_and_loop_continues() {
        let frames = Arc::new(BrokenFrames { attempts: AtomicUsize::new(0) });
        let extractor = SlowExtractor::new(Duration::from_millis(1), vec![]);
        let (pipeline, _store) = pipeline_with(
            config(),
            frames.clone(),
            extractor.clone(),
            Orchestrator::new(),
            Arc::new(RosterSnapshot::default()),
            PauseFlag::default(),
        )
        .await;

        let task = pipeline.spawn();
        tokio::time::sleep(Duration::from_secs(2)).await;
        task.abort();

        // Every tick failed at capture, yet the loop kept sampling.
        assert!(frames.attempts.load(Ordering::SeqCst) >= 3);
        assert_eq!(extractor.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dark_frames_never_reach_the_extractor() {
        let extractor = SlowExtractor::new(Duration::from_millis(1), vec![]);
        let (pipeline, _store) = pipeline_with(
            config(),
            Arc::new(DarkFrames),
            extractor.clone(),
            Orchestrator::new(),
            Arc::new(RosterSnapshot::default()),
            PauseFlag::default(),
        )
        .await;

        let task = pipeline.spawn();
        tokio::time::sleep(Duration::from_secs(2)).await;
        task.abort();

        assert_eq!(extractor.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_substituted_matcher_drives_classification() {
        struct AlwaysAda;

        impl Matcher for AlwaysAda {
            fn nearest(&self, _probe: &Descriptor, _gallery: &Gallery) -> MatchResult {
                MatchResult { name: Some("Ada".into()), distance: 0.1 }
            }
        }

        // Probe far from every gallery descriptor; only the substituted
        // matcher can classify it as Ada.
        let extractor = SlowExtractor::new(Duration::from_millis(1), vec![vec![50.0]]);
        let (pipeline, store) = pipeline_with(
            config(),
            Arc::new(StubFrames),
            extractor,
            Orchestrator::new(),
            ada_snapshot(),
            PauseFlag::default(),
        )
        .await;
        let pipeline = pipeline.with_matcher(Box::new(AlwaysAda));

        let task = pipeline.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        task.abort();

        let events = store
            .entrances_within(Utc::now(), chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Ada");
    }
}
