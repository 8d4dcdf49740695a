//! Entrance registry: at most one recorded entrance per identity per
//! trailing window.

use crate::{fmt_ts, parse_ts, Store, StoreError};
use chrono::{DateTime, Duration, Utc};
use dohr_core::EntranceEvent;
use rusqlite::params;
use uuid::Uuid;

/// Outcome of a conditional entrance registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// True when this call inserted the event; false when an entrance for
    /// the identity already existed inside the window.
    pub is_new: bool,
}

impl Store {
    /// Record an entrance for `name` unless one already exists within the
    /// trailing `window` as of `now`.
    ///
    /// The exists check and the insert run as a single conditional INSERT
    /// statement, so the pair cannot interleave with another caller on
    /// this store. Two independent daemon instances pointed at separate
    /// stores can still double-register; callers must treat that as a
    /// residual risk, not something this method prevents.
    pub async fn register_entrance_if_absent(
        &self,
        name: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Registration, StoreError> {
        let id = Uuid::new_v4().to_string();
        let name = name.to_string();
        let ts = fmt_ts(now);
        let cutoff = fmt_ts(now - window);

        let inserted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "INSERT INTO entrances (id, name, timestamp)
                     SELECT ?1, ?2, ?3
                     WHERE NOT EXISTS (
                         SELECT 1 FROM entrances WHERE name = ?2 AND timestamp > ?4
                     )",
                    params![id, name, ts, cutoff],
                )?;
                Ok(n > 0)
            })
            .await?;

        Ok(Registration { is_new: inserted })
    }

    /// Entrances within the trailing `window` as of `now`, newest first.
    pub async fn entrances_within(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<EntranceEvent>, StoreError> {
        let cutoff = fmt_ts(now - window);

        let raw = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, timestamp FROM entrances
                     WHERE timestamp > ?1 ORDER BY timestamp DESC",
                )?;
                let rows = stmt
                    .query_map(params![cutoff], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        raw.into_iter()
            .map(|(id, name, ts)| {
                Ok(EntranceEvent {
                    id,
                    name,
                    timestamp: parse_ts(&ts)?,
                })
            })
            .collect()
    }

    /// Delete an entrance event by id. Idempotent: removing a
    /// non-existent id is not an error.
    pub async fn remove_entrance(&self, id: String) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM entrances WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
