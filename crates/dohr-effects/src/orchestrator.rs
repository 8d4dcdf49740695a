//! Fan-out of entrance side effects with isolated failure domains.

use crate::notify::Notifier;
use crate::speech::{AudioSink, SpeechSynthesizer};
use crate::spotify::PlaybackService;
use crate::EffectError;
use dohr_core::Identity;
use std::path::PathBuf;
use std::sync::Arc;

/// Runs the three entrance legs — playback cue, notification relay,
/// synthesized greeting — concurrently and independently.
///
/// Every leg is optional; an unconfigured leg is a silent no-op. The
/// orchestrator's own contract never fails: it reports completion having
/// attempted all legs, whatever their individual outcomes. Leg failures
/// are logged and never retried within the same invocation.
#[derive(Default)]
pub struct Orchestrator {
    playback: Option<Arc<dyn PlaybackService>>,
    default_device: Option<String>,
    notifiers: Vec<Arc<dyn Notifier>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    speech_sink: Option<Arc<dyn AudioSink>>,
    chime_sink: Option<Arc<dyn AudioSink>>,
    chime_path: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_playback(mut self, playback: Arc<dyn PlaybackService>, default_device: Option<String>) -> Self {
        self.playback = Some(playback);
        self.default_device = default_device;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>, sink: Arc<dyn AudioSink>) -> Self {
        self.speech = Some(speech);
        self.speech_sink = Some(sink);
        self
    }

    pub fn with_chime(mut self, sink: Arc<dyn AudioSink>, chime_path: PathBuf) -> Self {
        self.chime_sink = Some(sink);
        self.chime_path = Some(chime_path);
        self
    }

    /// Announce a confirmed new entrance. Invoked only when the registry
    /// reported the event as new.
    pub async fn announce_entrance(&self, identity: &Identity) {
        tracing::info!(name = %identity.name, "announcing entrance");

        let message = format!("{} is in the building!", identity.name);
        let greeting = format!("Welcome, {}!", identity.name);

        tokio::join!(
            self.playback_leg(identity),
            self.notify_leg(&message),
            self.speech_leg(&greeting),
        );
    }

    /// Announce an unrecognized visitor: chime plus admin notification.
    /// Rate limiting is the detection loop's job, not ours.
    pub async fn announce_unknown(&self) {
        tokio::join!(self.chime_leg(), self.notify_leg("Unknown person at the door"));
    }

    async fn playback_leg(&self, identity: &Identity) {
        let Some(playback) = &self.playback else {
            tracing::debug!("playback not configured; skipping cue");
            return;
        };
        if let Err(err) = self.run_playback_cue(playback.as_ref(), identity).await {
            tracing::warn!(name = %identity.name, error = %err, "playback cue failed");
        }
    }

    /// The cue sequence: wake a device if none is active, queue the
    /// identity's track, jump to it.
    async fn run_playback_cue(
        &self,
        playback: &dyn PlaybackService,
        identity: &Identity,
    ) -> Result<(), EffectError> {
        let state = playback.get_playback_state().await?;
        if !state.device_active {
            match &self.default_device {
                Some(device_id) => playback.transfer_playback(device_id).await?,
                None => {
                    tracing::warn!("no active device and no default configured; queueing anyway");
                }
            }
        }
        playback.enqueue(&identity.track_uri).await?;
        playback.skip_next().await?;
        Ok(())
    }

    async fn notify_leg(&self, message: &str) {
        // All relays in parallel; one channel's failure never blocks another.
        let sends = self.notifiers.iter().map(|notifier| async move {
            match notifier.send(message).await {
                Ok(()) => tracing::info!(channel = notifier.channel(), "notification sent"),
                Err(err) => {
                    tracing::warn!(channel = notifier.channel(), error = %err, "notification failed")
                }
            }
        });
        futures::future::join_all(sends).await;
    }

    async fn speech_leg(&self, greeting: &str) {
        let (Some(speech), Some(sink)) = (&self.speech, &self.speech_sink) else {
            return;
        };
        let result = async {
            let audio = speech.synthesize(greeting).await?;
            sink.play(audio).await
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "greeting synthesis failed");
        }
    }

    async fn chime_leg(&self) {
        let (Some(sink), Some(path)) = (&self.chime_sink, &self.chime_path) else {
            return;
        };
        let result = async {
            let audio = tokio::fs::read(path).await?;
            sink.play(audio).await
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "unknown-visitor chime failed");
        }
    }
}
