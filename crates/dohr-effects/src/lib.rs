//! dohr-effects — Downstream side effects of a confirmed entrance.
//!
//! Three independent legs: a playback cue on the house speakers, a
//! best-effort push to messaging relays, and a synthesized greeting
//! played locally. Each leg contains its own failures; the orchestrator
//! itself never fails.

pub mod notify;
pub mod orchestrator;
pub mod speech;
pub mod spotify;

use thiserror::Error;

pub use notify::{Notifier, SlackWebhook, TelegramBot};
pub use orchestrator::Orchestrator;
pub use speech::{AudioSink, CommandPlayer, HttpSpeech, SpeechSynthesizer};
pub use spotify::{PlaybackService, PlaybackState, SpotifyClient};

#[derive(Error, Debug)]
pub enum EffectError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} returned {status}")]
    Api {
        service: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("token refresh failed: {0}")]
    Auth(String),
    #[error("audio playback failed: {0}")]
    Playback(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
