//! Greeting synthesis and local audio playback.

use crate::EffectError;
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

/// Text-to-speech capability: a greeting string in, audio bytes out.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, EffectError>;
}

/// Local audio output for synthesized greetings and the unknown-visitor
/// chime.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio: Vec<u8>) -> Result<(), EffectError>;
}

/// Client for an OpenAI-compatible `/v1/audio/speech` endpoint.
pub struct HttpSpeech {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    voice: String,
}

impl HttpSpeech {
    pub fn new(
        http: reqwest::Client,
        endpoint: String,
        api_key: String,
        model: String,
        voice: String,
    ) -> Self {
        Self { http, endpoint, api_key, model, voice }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, EffectError> {
        let response = self
            .http
            .post(format!("{}/v1/audio/speech", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "voice": self.voice,
                "input": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EffectError::Api {
                service: "speech",
                status: response.status(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Plays audio by handing a scratch file to an external player command
/// (e.g. `mpg123 -q`).
pub struct CommandPlayer {
    command: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self { command, args }
    }

    /// Play an audio file already on disk (the unknown-visitor chime).
    pub async fn play_file(&self, path: &Path) -> Result<(), EffectError> {
        let status = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if !status.success() {
            return Err(EffectError::Playback(format!(
                "{} exited with {status}",
                self.command
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AudioSink for CommandPlayer {
    async fn play(&self, audio: Vec<u8>) -> Result<(), EffectError> {
        // The scratch file must outlive the player process.
        let file = tokio::task::spawn_blocking(move || -> Result<tempfile::NamedTempFile, EffectError> {
            let mut file = tempfile::Builder::new().suffix(".mp3").tempfile()?;
            file.write_all(&audio)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|e| EffectError::Playback(format!("scratch file task aborted: {e}")))??;

        self.play_file(file.path()).await
    }
}
