//! Spotify Web API client for the playback-cue leg.
//!
//! Auth uses the refresh-token grant: the long-lived refresh token comes
//! from configuration (obtained once through the dashboard's OAuth flow,
//! which is outside this daemon); short-lived access tokens are refreshed
//! transparently before API calls.

use crate::EffectError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
/// Refresh slightly early so a token never expires mid-call.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Current playback state, reduced to what the cue sequence needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    pub device_active: bool,
}

/// Music playback as the orchestrator consumes it. Every call may fail
/// independently (HTTP error, expired auth, no premium session).
#[async_trait]
pub trait PlaybackService: Send + Sync {
    async fn get_playback_state(&self) -> Result<PlaybackState, EffectError>;
    async fn transfer_playback(&self, device_id: &str) -> Result<(), EffectError>;
    async fn enqueue(&self, track_uri: &str) -> Result<(), EffectError>;
    async fn skip_next(&self) -> Result<(), EffectError>;
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Spotify Web API implementation of [`PlaybackService`].
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct PlayerResponse {
    device: Option<PlayerDevice>,
}

#[derive(Deserialize)]
struct PlayerDevice {
    is_active: bool,
}

impl SpotifyClient {
    pub fn new(http: reqwest::Client, client_id: String, client_secret: String, refresh_token: String) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            refresh_token,
            token: Mutex::new(None),
        }
    }

    /// Return a valid access token, refreshing through the accounts
    /// endpoint when the cached one is missing or expiring.
    async fn access_token(&self) -> Result<String, EffectError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_SLACK {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .http
            .post(ACCOUNTS_TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EffectError::Auth(format!(
                "accounts endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = token.expires_in, "spotify access token refreshed");

        let access = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access)
    }

    fn check(response: reqwest::Response) -> Result<reqwest::Response, EffectError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(EffectError::Api {
                service: "spotify",
                status: response.status(),
            })
        }
    }
}

#[async_trait]
impl PlaybackService for SpotifyClient {
    async fn get_playback_state(&self) -> Result<PlaybackState, EffectError> {
        let token = self.access_token().await?;
        let response = Self::check(
            self.http
                .get(format!("{API_BASE}/me/player"))
                .bearer_auth(token)
                .send()
                .await?,
        )?;

        // 204 means no active playback session at all.
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(PlaybackState { device_active: false });
        }

        let player: PlayerResponse = response.json().await?;
        Ok(PlaybackState {
            device_active: player.device.map(|d| d.is_active).unwrap_or(false),
        })
    }

    async fn transfer_playback(&self, device_id: &str) -> Result<(), EffectError> {
        let token = self.access_token().await?;
        Self::check(
            self.http
                .put(format!("{API_BASE}/me/player"))
                .bearer_auth(token)
                .json(&serde_json::json!({ "device_ids": [device_id], "play": true }))
                .send()
                .await?,
        )?;
        tracing::info!(device_id, "playback transferred");
        Ok(())
    }

    async fn enqueue(&self, track_uri: &str) -> Result<(), EffectError> {
        let token = self.access_token().await?;
        Self::check(
            self.http
                .post(format!("{API_BASE}/me/player/queue"))
                .query(&[("uri", track_uri)])
                .bearer_auth(token)
                .send()
                .await?,
        )?;
        tracing::info!(track_uri, "track enqueued");
        Ok(())
    }

    async fn skip_next(&self) -> Result<(), EffectError> {
        let token = self.access_token().await?;
        Self::check(
            self.http
                .post(format!("{API_BASE}/me/player/next"))
                .bearer_auth(token)
                .send()
                .await?,
        )?;
        Ok(())
    }
}
