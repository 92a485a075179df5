//! SQLite-backed durable mutation queue.
//!
//! Rows are ordered by an autoincrement `seq` so drain order matches enqueue
//! order across restarts. Acknowledged ids move to `applied_mutations` in
//! the same transaction that deletes the queue row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::StoreDb;
use super::traits::DurableQueue;
use crate::Error;
use crate::mutation::{MutationStatus, PendingMutation};

const SELECT_COLUMNS: &str = "SELECT mutation_id, entity_type, payload_json, created_at, retry_count,
        next_retry_at, status, last_error FROM mutation_queue";

/// Durable queue over a shared [`StoreDb`].
#[derive(Clone, Debug)]
pub struct SqliteQueue {
    db: StoreDb,
    max_retries: u32,
}

impl SqliteQueue {
    /// Wrap a store; mutations fail permanently after `max_retries` transient errors.
    pub fn new(db: StoreDb, max_retries: u32) -> Self {
        Self { db, max_retries: max_retries.max(1) }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Raw column values before decoding.
struct RawRow {
    id: String,
    entity_type: String,
    payload_json: String,
    created_at: i64,
    retry_count: i64,
    next_retry_at: i64,
    status: String,
    last_error: Option<String>,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            payload_json: row.get(2)?,
            created_at: row.get(3)?,
            retry_count: row.get(4)?,
            next_retry_at: row.get(5)?,
            status: row.get(6)?,
            last_error: row.get(7)?,
        })
    }

    fn decode(self) -> Result<PendingMutation, Error> {
        let corrupt = |reason: String| Error::QueueCorruption { id: self.id.clone(), reason };

        let payload: serde_json::Value =
            serde_json::from_str(&self.payload_json).map_err(|e| corrupt(format!("payload: {e}")))?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.created_at)
            .ok_or_else(|| corrupt(format!("created_at out of range: {}", self.created_at)))?;
        let next_retry_at = DateTime::<Utc>::from_timestamp_millis(self.next_retry_at)
            .ok_or_else(|| corrupt(format!("next_retry_at out of range: {}", self.next_retry_at)))?;
        let retry_count =
            u32::try_from(self.retry_count).map_err(|_| corrupt(format!("retry_count: {}", self.retry_count)))?;
        let status: MutationStatus = self.status.parse().map_err(|_| corrupt(format!("status: {}", self.status)))?;

        Ok(PendingMutation {
            id: self.id,
            entity_type: self.entity_type,
            payload,
            created_at,
            retry_count,
            next_retry_at,
            status,
            last_error: self.last_error,
        })
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Decode every row, skipping and logging the ones that fail.
fn decode_rows(rows: Vec<RawRow>) -> Vec<PendingMutation> {
    rows.into_iter()
        .filter_map(|raw| match raw.decode() {
            Ok(mutation) => Some(mutation),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable queue row");
                None
            }
        })
        .collect()
}

impl SqliteQueue {
    async fn list_by_status(&self, status: MutationStatus) -> Result<Vec<PendingMutation>, Error> {
        let rows = self
            .db
            .conn
            .call(move |conn| -> Result<Vec<RawRow>, Error> {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY seq ASC"))?;
                let rows = stmt.query_map(params![status.as_str()], RawRow::read)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
            .map_err(Error::from)?;
        Ok(decode_rows(rows))
    }
}

#[async_trait]
impl DurableQueue for SqliteQueue {
    async fn enqueue(&self, mutation: PendingMutation) -> Result<String, Error> {
        mutation.validate()?;
        let payload_json = serde_json::to_string(&mutation.payload)?;

        self.db
            .conn
            .call(move |conn| -> Result<String, Error> {
                let tx = conn.transaction()?;
                let applied: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM applied_mutations WHERE mutation_id = ?1)",
                    params![mutation.id],
                    |row| row.get(0),
                )?;
                if applied {
                    tracing::debug!(id = %mutation.id, "Mutation already applied, not re-queued");
                    return Ok(mutation.id);
                }

                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO mutation_queue (
                        mutation_id, entity_type, payload_json, created_at, retry_count, next_retry_at, status
                    ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                    params![
                        mutation.id,
                        mutation.entity_type,
                        payload_json,
                        mutation.created_at.timestamp_millis(),
                        mutation.next_retry_at.timestamp_millis(),
                        MutationStatus::Pending.as_str(),
                    ],
                )?;
                tx.commit()?;

                if inserted == 0 {
                    tracing::debug!(id = %mutation.id, "Mutation already queued");
                }
                Ok(mutation.id)
            })
            .await
            .map_err(Error::from)
    }

    async fn list_pending(&self) -> Result<Vec<PendingMutation>, Error> {
        self.list_by_status(MutationStatus::Pending).await
    }

    async fn list_failed(&self) -> Result<Vec<PendingMutation>, Error> {
        self.list_by_status(MutationStatus::Failed).await
    }

    async fn get(&self, id: &str) -> Result<Option<PendingMutation>, Error> {
        let id = id.to_string();
        let raw = self
            .db
            .conn
            .call(move |conn| -> Result<Option<RawRow>, Error> {
                let result =
                    conn.query_row(&format!("{SELECT_COLUMNS} WHERE mutation_id = ?1"), params![id], RawRow::read);
                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;
        raw.map(RawRow::decode).transpose()
    }

    async fn mark_in_flight(&self, id: &str) -> Result<(), Error> {
        let id = id.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let updated = conn.execute(
                    "UPDATE mutation_queue SET status = 'in_flight' WHERE mutation_id = ?1 AND status = 'pending'",
                    params![id],
                )?;
                if updated == 0 {
                    return Err(Error::MutationNotFound(id));
                }
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn mark_applied(&self, id: &str) -> Result<(), Error> {
        let id = id.to_string();
        let applied_at = now_millis();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                let entity_type: String = match tx.query_row(
                    "SELECT entity_type FROM mutation_queue WHERE mutation_id = ?1",
                    params![id],
                    |row| row.get(0),
                ) {
                    Ok(entity_type) => entity_type,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Err(Error::MutationNotFound(id)),
                    Err(e) => return Err(e.into()),
                };

                tx.execute(
                    "INSERT OR IGNORE INTO applied_mutations (mutation_id, entity_type, applied_at) VALUES (?1, ?2, ?3)",
                    params![id, entity_type, applied_at],
                )?;
                tx.execute("DELETE FROM mutation_queue WHERE mutation_id = ?1", params![id])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn mark_failed_retry(&self, id: &str, backoff: Duration, error: &str) -> Result<MutationStatus, Error> {
        let id = id.to_string();
        let error = error.to_string();
        let max_retries = i64::from(self.max_retries);
        let backoff_ms = i64::try_from(backoff.as_millis()).unwrap_or(i64::MAX / 2);
        let now = now_millis();

        self.db
            .conn
            .call(move |conn| -> Result<MutationStatus, Error> {
                let tx = conn.transaction()?;
                let retry_count: i64 = match tx.query_row(
                    "SELECT retry_count FROM mutation_queue
                     WHERE mutation_id = ?1 AND status IN ('pending', 'in_flight')",
                    params![id],
                    |row| row.get(0),
                ) {
                    Ok(count) => count,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Err(Error::MutationNotFound(id)),
                    Err(e) => return Err(e.into()),
                };

                let retry_count = retry_count + 1;
                let status =
                    if retry_count >= max_retries { MutationStatus::Failed } else { MutationStatus::Pending };

                tx.execute(
                    "UPDATE mutation_queue
                     SET retry_count = ?2, next_retry_at = ?3, status = ?4, last_error = ?5
                     WHERE mutation_id = ?1",
                    params![id, retry_count, now.saturating_add(backoff_ms), status.as_str(), error],
                )?;
                tx.commit()?;
                Ok(status)
            })
            .await
            .map_err(Error::from)
    }

    async fn mark_failed_permanent(&self, id: &str, reason: &str) -> Result<(), Error> {
        let id = id.to_string();
        let reason = reason.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let updated = conn.execute(
                    "UPDATE mutation_queue SET status = 'failed', last_error = ?2
                     WHERE mutation_id = ?1 AND status IN ('pending', 'in_flight')",
                    params![id, reason],
                )?;
                if updated == 0 {
                    return Err(Error::MutationNotFound(id));
                }
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn release_in_flight(&self) -> Result<u64, Error> {
        self.db
            .conn
            .call(|conn| -> Result<u64, Error> {
                let released =
                    conn.execute("UPDATE mutation_queue SET status = 'pending' WHERE status = 'in_flight'", [])?;
                Ok(released as u64)
            })
            .await
            .map_err(Error::from)
    }

    async fn discard(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute(
                    "DELETE FROM mutation_queue WHERE mutation_id = ?1 AND status = 'failed'",
                    params![id],
                )?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn record_applied(&self, mutation: &PendingMutation) -> Result<(), Error> {
        let id = mutation.id.clone();
        let entity_type = mutation.entity_type.clone();
        let applied_at = now_millis();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO applied_mutations (mutation_id, entity_type, applied_at) VALUES (?1, ?2, ?3)",
                    params![id, entity_type, applied_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn is_applied(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let applied: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM applied_mutations WHERE mutation_id = ?1)",
                    params![id],
                    |row| row.get(0),
                )?;
                Ok(applied)
            })
            .await
            .map_err(Error::from)
    }

    async fn prune_applied(&self, older_than: DateTime<Utc>) -> Result<u64, Error> {
        let cutoff = older_than.timestamp_millis();
        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let deleted = conn.execute("DELETE FROM applied_mutations WHERE applied_at < ?1", params![cutoff])?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
