use anyhow::{Context, Result};
use dohr_core::{DescriptorExtractor, OnnxExtractor};
use dohr_effects::{
    CommandPlayer, HttpSpeech, Orchestrator, SlackWebhook, SpotifyClient, TelegramBot,
};
use dohr_hw::Camera;
use dohr_store::Store;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod pipeline;
mod roster;

use config::Config;
use dbus_interface::DohrService;
use pipeline::{CameraSource, PauseFlag, Pipeline, PipelineConfig};
use roster::RosterSnapshot;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = Config::from_env();
    tracing::info!(
        camera = %cfg.camera_device,
        db = %cfg.db_path.display(),
        "dohrd starting"
    );

    let store = Store::open(&cfg.db_path)
        .await
        .context("opening entrance database")?;
    let pause = PauseFlag::new(store.is_paused().await?);

    let extractor: Arc<dyn DescriptorExtractor> = Arc::new(OnnxExtractor::load(
        &cfg.detector_model_path(),
        &cfg.embedder_model_path(),
    )?);

    let camera = Camera::open(&cfg.camera_device).context("opening camera")?;
    camera.warmup(cfg.warmup_frames);

    let orchestrator = Arc::new(build_orchestrator(&cfg));

    // Roster snapshots flow to the pipeline through a watch channel; the
    // rebuild task is woken by the D-Bus layer on enroll and remove.
    let roster_changed = Arc::new(Notify::new());
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(RosterSnapshot::default()));
    tokio::spawn(roster::run_roster_task(
        store.clone(),
        Arc::clone(&extractor),
        Arc::clone(&roster_changed),
        snapshot_tx,
    ));

    let pipeline = Pipeline::new(
        PipelineConfig {
            tick_interval: cfg.tick_interval,
            tick_timeout: cfg.tick_timeout,
            match_threshold: cfg.match_threshold,
            dedup_window: cfg.dedup_window,
            unknown_cooldown: cfg.unknown_cooldown,
        },
        Arc::new(CameraSource::new(camera, cfg.min_luma)),
        Arc::clone(&extractor),
        store.clone(),
        Arc::clone(&orchestrator),
        snapshot_rx,
        pause.clone(),
    );
    pipeline.spawn();

    let service = DohrService::new(
        store,
        extractor,
        pause,
        roster_changed,
        cfg.dedup_window,
    );
    let _connection = zbus::connection::Builder::session()?
        .name("org.dohr.Dohr1")?
        .serve_at("/org/dohr/Dohr1", service)?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!("dohrd ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("dohrd shutting down");

    Ok(())
}

/// Assemble the side-effect fan-out from whatever services are
/// configured. Every leg is optional; an unconfigured leg is simply
/// absent from the orchestrator.
fn build_orchestrator(cfg: &Config) -> Orchestrator {
    let http = reqwest::Client::new();
    let mut orchestrator = Orchestrator::new();

    if let (Some(id), Some(secret), Some(token)) = (
        cfg.spotify_client_id.clone(),
        cfg.spotify_client_secret.clone(),
        cfg.spotify_refresh_token.clone(),
    ) {
        orchestrator = orchestrator.with_playback(
            Arc::new(SpotifyClient::new(http.clone(), id, secret, token)),
            cfg.spotify_device_id.clone(),
        );
        tracing::info!("playback leg configured");
    }

    if let Some(url) = cfg.slack_webhook_url.clone() {
        orchestrator = orchestrator.with_notifier(Arc::new(SlackWebhook::new(http.clone(), url)));
    }
    if let (Some(token), Some(chat)) = (cfg.telegram_api_token.clone(), cfg.telegram_chat_id.clone())
    {
        orchestrator =
            orchestrator.with_notifier(Arc::new(TelegramBot::new(http.clone(), token, chat)));
    }

    let player = Arc::new(CommandPlayer::new(
        cfg.player_command.clone(),
        cfg.player_args.clone(),
    ));
    if let Some(key) = cfg.speech_api_key.clone() {
        orchestrator = orchestrator.with_speech(
            Arc::new(HttpSpeech::new(
                http,
                cfg.speech_endpoint.clone(),
                key,
                cfg.speech_model.clone(),
                cfg.speech_voice.clone(),
            )),
            Arc::clone(&player) as Arc<dyn dohr_effects::AudioSink>,
        );
        tracing::info!("speech leg configured");
    }
    if let Some(chime) = cfg.chime_path.clone() {
        orchestrator = orchestrator.with_chime(player, chime);
    }

    orchestrator
}
