use crate::pipeline::PauseFlag;
use crate::roster::{enroll, EnrollError};
use chrono::Utc;
use dohr_core::DescriptorExtractor;
use dohr_store::{Store, StoreError};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use zbus::interface;

/// D-Bus control surface for the Dohr entrance daemon.
///
/// Bus name: org.dohr.Dohr1
/// Object path: /org/dohr/Dohr1
pub struct DohrService {
    store: Store,
    extractor: Arc<dyn DescriptorExtractor>,
    pause: PauseFlag,
    roster_changed: Arc<Notify>,
    dedup_window: chrono::Duration,
    // Serializes toggle_pause so the in-memory flag can never diverge
    // from the persisted row under concurrent calls.
    toggle_lock: Mutex<()>,
}

impl DohrService {
    pub fn new(
        store: Store,
        extractor: Arc<dyn DescriptorExtractor>,
        pause: PauseFlag,
        roster_changed: Arc<Notify>,
        dedup_window: chrono::Duration,
    ) -> Self {
        Self {
            store,
            extractor,
            pause,
            roster_changed,
            dedup_window,
            toggle_lock: Mutex::new(()),
        }
    }
}

fn enroll_err(err: EnrollError) -> zbus::fdo::Error {
    match err {
        EnrollError::Store(StoreError::DuplicateName(name)) => {
            zbus::fdo::Error::FileExists(format!("an identity named {name} already exists"))
        }
        EnrollError::Decode(_) | EnrollError::NoFace | EnrollError::MultipleFaces(_) => {
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn store_err(err: StoreError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "org.dohr.Dohr1")]
impl DohrService {
    /// Enroll a new identity from a reference photo. Returns the new
    /// identity's ID.
    async fn enroll(
        &self,
        name: &str,
        photo: Vec<u8>,
        track_uri: &str,
        track_name: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(name, photo_bytes = photo.len(), "enroll requested");
        let identity = enroll(
            &self.store,
            self.extractor.as_ref(),
            name.to_string(),
            photo,
            track_uri.to_string(),
            track_name.to_string(),
        )
        .await
        .map_err(enroll_err)?;

        self.roster_changed.notify_one();
        Ok(identity.id)
    }

    /// Remove an identity by ID. Returns false if no such identity.
    async fn remove_identity(&self, id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "remove_identity requested");
        let removed = self
            .store
            .remove_identity(id.to_string())
            .await
            .map_err(store_err)?;
        if removed {
            self.roster_changed.notify_one();
        }
        Ok(removed)
    }

    /// List enrolled identities as JSON. Reference photos are omitted.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let roster = self.store.list_identities().await.map_err(store_err)?;
        serde_json::to_string(&roster).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// List entrance events inside the dedup window, newest first, as JSON.
    async fn entrances(&self) -> zbus::fdo::Result<String> {
        let events = self
            .store
            .entrances_within(Utc::now(), self.dedup_window)
            .await
            .map_err(store_err)?;
        serde_json::to_string(&events).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Remove an entrance event by ID, clearing the dedup suppression for
    /// that identity. Removing an unknown ID is a no-op.
    async fn remove_entrance(&self, id: &str) -> zbus::fdo::Result<()> {
        tracing::info!(id, "remove_entrance requested");
        self.store
            .remove_entrance(id.to_string())
            .await
            .map_err(store_err)
    }

    /// Flip the detection pause flag. Returns the new state. The flag is
    /// persisted and survives a daemon restart.
    async fn toggle_pause(&self) -> zbus::fdo::Result<bool> {
        let _guard = self.toggle_lock.lock().await;
        let paused = self.store.toggle_paused().await.map_err(store_err)?;
        self.pause.set(paused);
        tracing::info!(paused, "pause toggled");
        Ok(paused)
    }

    /// Current pause state.
    async fn get_pause_state(&self) -> zbus::fdo::Result<bool> {
        Ok(self.pause.is_paused())
    }

    /// Daemon status summary as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let roster = self.store.list_identities().await.map_err(store_err)?;
        let recent = self
            .store
            .entrances_within(Utc::now(), self.dedup_window)
            .await
            .map_err(store_err)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "paused": self.pause.is_paused(),
            "identities": roster.len(),
            "entrances_in_window": recent.len(),
        })
        .to_string())
    }
}
