//! Cache generation and entry storage.
//!
//! Provides the SQLite implementation of [`CacheStore`]: generation
//! bookkeeping, request-keyed entries and the fallback table.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::StoreDb;
use super::traits::CacheStore;
use crate::{Error, ResourceRequest, Response};

/// A named cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationInfo {
    pub name: String,
    pub created_at: String,
    pub active: bool,
    pub activated_at: Option<String>,
}

/// A captured response stored under `(method, url)` in one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub generation: String,
    pub request_key: String,
    pub method: String,
    pub url: String,
    pub response: Response,
    pub stored_at: String,
}

impl CacheEntry {
    /// Build an entry for `request` in `generation`, stamped now.
    pub fn new(generation: &str, request: &ResourceRequest, response: Response) -> Self {
        Self {
            generation: generation.to_string(),
            request_key: request.cache_key(),
            method: request.method.clone(),
            url: request.url.to_string(),
            response,
            stored_at: now_stamp(),
        }
    }
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_headers(json: &str) -> Result<Vec<(String, String)>, Error> {
    serde_json::from_str(json).map_err(Error::from)
}

#[async_trait]
impl CacheStore for StoreDb {
    async fn create_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        let created_at = now_stamp();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO cache_generations (name, created_at, active) VALUES (?1, ?2, 0)",
                    params![name, created_at],
                )?;
                Ok(inserted == 1)
            })
            .await
            .map_err(Error::from)
    }

    async fn list_generations(&self) -> Result<Vec<GenerationInfo>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<GenerationInfo>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT name, created_at, active, activated_at
                     FROM cache_generations ORDER BY created_at ASC, name ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(GenerationInfo {
                        name: row.get(0)?,
                        created_at: row.get(1)?,
                        active: row.get::<_, i32>(2)? == 1,
                        activated_at: row.get(3)?,
                    })
                })?;
                let mut generations = Vec::new();
                for row in rows {
                    generations.push(row?);
                }
                Ok(generations)
            })
            .await
            .map_err(Error::from)
    }

    async fn active_generation(&self) -> Result<Option<String>, Error> {
        self.conn
            .call(|conn| -> Result<Option<String>, Error> {
                let result =
                    conn.query_row("SELECT name FROM cache_generations WHERE active = 1", [], |row| row.get(0));
                match result {
                    Ok(name) => Ok(Some(name)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn activate_generation(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        let activated_at = now_stamp();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM cache_generations WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(Error::UnknownGeneration(name));
                }

                tx.execute(
                    "UPDATE cache_generations SET active = 0 WHERE active = 1 AND name != ?1",
                    params![name],
                )?;
                tx.execute(
                    "UPDATE cache_generations SET active = 1, activated_at = ?2 WHERE name = ?1 AND active = 0",
                    params![name, activated_at],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let active: Option<bool> = match conn.query_row(
                    "SELECT active FROM cache_generations WHERE name = ?1",
                    params![name],
                    |row| row.get::<_, i32>(0),
                ) {
                    Ok(flag) => Some(flag == 1),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e.into()),
                };

                match active {
                    None => Ok(false),
                    Some(true) => Err(Error::InvalidInput(format!("cannot delete active generation {name}"))),
                    Some(false) => {
                        conn.execute("DELETE FROM cache_generations WHERE name = ?1", params![name])?;
                        Ok(true)
                    }
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn get_entry(&self, generation: &str, request_key: &str) -> Result<Option<CacheEntry>, Error> {
        let generation = generation.to_string();
        let request_key = request_key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT method, url, status, headers_json, body, stored_at
                     FROM cache_entries WHERE generation = ?1 AND request_key = ?2",
                )?;

                let result = stmt.query_row(params![generation, request_key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u16>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                });

                match result {
                    Ok((method, url, status, headers_json, body, stored_at)) => Ok(Some(CacheEntry {
                        generation,
                        request_key,
                        method,
                        url,
                        response: Response::new(status, decode_headers(&headers_json)?, body),
                        stored_at,
                    })),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn put_entry(&self, entry: &CacheEntry, require_active: bool) -> Result<bool, Error> {
        if !entry.response.is_success() {
            return Err(Error::UncacheableResponse(entry.response.status));
        }

        let entry = entry.clone();
        let headers_json = serde_json::to_string(&entry.response.headers)?;
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let written = conn.execute(
                    "INSERT INTO cache_entries (
                        generation, request_key, method, url, status, headers_json, body, stored_at
                    )
                    SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                    WHERE EXISTS (
                        SELECT 1 FROM cache_generations WHERE name = ?1 AND (?9 = 0 OR active = 1)
                    )
                    ON CONFLICT(generation, request_key) DO UPDATE SET
                        method = excluded.method,
                        url = excluded.url,
                        status = excluded.status,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![
                        &entry.generation,
                        &entry.request_key,
                        &entry.method,
                        &entry.url,
                        entry.response.status,
                        headers_json,
                        &entry.response.body,
                        &entry.stored_at,
                        require_active,
                    ],
                )?;
                Ok(written > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn count_entries(&self, generation: &str) -> Result<u64, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE generation = ?1",
                    params![generation],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    async fn purge_oldest_entries(&self, generation: &str, max_entries: usize) -> Result<u64, Error> {
        let generation = generation.to_string();
        let max = i64::try_from(max_entries).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE generation = ?1",
                    params![generation],
                    |row| row.get(0),
                )?;
                if count <= max {
                    return Ok(0);
                }

                let to_delete = count - max;
                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE generation = ?1 AND request_key IN (
                        SELECT request_key FROM cache_entries WHERE generation = ?1
                        ORDER BY stored_at ASC, rowid ASC LIMIT ?2
                    )",
                    params![generation, to_delete],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }

    async fn put_fallback(&self, kind: &str, response: &Response) -> Result<(), Error> {
        let kind = kind.to_string();
        let response = response.clone();
        let headers_json = serde_json::to_string(&response.headers)?;
        let seeded_at = now_stamp();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO fallback_entries (kind, status, headers_json, body, seeded_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(kind) DO UPDATE SET
                        status = excluded.status,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        seeded_at = excluded.seeded_at",
                    params![kind, response.status, headers_json, response.body, seeded_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn list_fallbacks(&self) -> Result<Vec<(String, Response)>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<(String, Response)>, Error> {
                let mut stmt = conn.prepare("SELECT kind, status, headers_json, body FROM fallback_entries")?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u16>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                })?;

                let mut fallbacks = Vec::new();
                for row in rows {
                    let (kind, status, headers_json, body) = row?;
                    fallbacks.push((kind, Response::new(status, decode_headers(&headers_json)?, body)));
                }
                Ok(fallbacks)
            })
            .await
            .map_err(Error::from)
    }
}
