//! Identity roster operations.

use crate::{Store, StoreError};
use dohr_core::Identity;
use rusqlite::params;
use uuid::Uuid;

impl Store {
    /// Insert a newly enrolled identity and return it with its assigned id.
    ///
    /// Names are unique; enrolling a second "Ada" is rejected rather than
    /// silently merged, since entrances are keyed by name.
    pub async fn add_identity(
        &self,
        name: String,
        photo: Vec<u8>,
        track_uri: String,
        track_name: String,
    ) -> Result<Identity, StoreError> {
        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            name,
            photo,
            track_uri,
            track_name,
        };

        let row = identity.clone();
        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (id, name, photo, track_uri, track_name)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row.id, row.name, row.photo, row.track_uri, row.track_name],
                )?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(name = %identity.name, id = %identity.id, "identity enrolled");
                Ok(identity)
            }
            Err(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, msg)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                tracing::debug!(error = ?msg, "constraint violation on enroll");
                Err(StoreError::DuplicateName(identity.name))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an identity by id. Returns whether a row was removed;
    /// deleting an unknown id is not an error.
    pub async fn remove_identity(&self, id: String) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
                Ok(n > 0)
            })
            .await?;
        Ok(removed)
    }

    /// Current roster, enrollment order.
    pub async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let identities = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, photo, track_uri, track_name FROM identities ORDER BY rowid",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(Identity {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            photo: row.get(2)?,
                            track_uri: row.get(3)?,
                            track_name: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Store, StoreError};

    #[tokio::test]
    async fn test_add_and_list() {
        let store = Store::open_in_memory().await.unwrap();
        let ada = store
            .add_identity("Ada".into(), vec![1, 2, 3], "spotify:track:123".into(), "Homework".into())
            .await
            .unwrap();

        let roster = store.list_identities().await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, ada.id);
        assert_eq!(roster[0].name, "Ada");
        assert_eq!(roster[0].photo, vec![1, 2, 3]);
        assert_eq!(roster[0].track_uri, "spotify:track:123");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .add_identity("Ada".into(), vec![], "uri".into(), "t".into())
            .await
            .unwrap();
        let err = store
            .add_identity("Ada".into(), vec![], "uri".into(), "t".into())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(n) if n == "Ada"));
    }

    #[tokio::test]
    async fn test_remove_identity_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let ada = store
            .add_identity("Ada".into(), vec![], "uri".into(), "t".into())
            .await
            .unwrap();

        assert!(store.remove_identity(ada.id.clone()).await.unwrap());
        assert!(!store.remove_identity(ada.id).await.unwrap());
        assert!(store.list_identities().await.unwrap().is_empty());
    }
}
