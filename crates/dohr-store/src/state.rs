//! Persisted pause flag.

use crate::{Store, StoreError};

impl Store {
    /// Read the operator-controlled pause flag.
    pub async fn is_paused(&self) -> Result<bool, StoreError> {
        let paused = self
            .conn
            .call(|conn| {
                let v: i64 =
                    conn.query_row("SELECT is_paused FROM system_state WHERE id = 1", [], |row| {
                        row.get(0)
                    })?;
                Ok(v != 0)
            })
            .await?;
        Ok(paused)
    }

    /// Flip the pause flag, returning the new state.
    pub async fn toggle_paused(&self) -> Result<bool, StoreError> {
        let paused = self
            .conn
            .call(|conn| {
                let v: i64 = conn.query_row(
                    "UPDATE system_state SET is_paused = NOT is_paused WHERE id = 1
                     RETURNING is_paused",
                    [],
                    |row| row.get(0),
                )?;
                Ok(v != 0)
            })
            .await?;
        tracing::info!(paused, "pause state toggled");
        Ok(paused)
    }
}

#[cfg(test)]
mod tests {
    use crate::Store;

    #[tokio::test]
    async fn test_pause_defaults_off_and_toggles() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(!store.is_paused().await.unwrap());

        assert!(store.toggle_paused().await.unwrap());
        assert!(store.is_paused().await.unwrap());

        assert!(!store.toggle_paused().await.unwrap());
        assert!(!store.is_paused().await.unwrap());
    }
}
