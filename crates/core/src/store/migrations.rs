//! Database schema migrations.
//!
//! Applied versions are recorded in `_migrations`; only steps above the
//! recorded maximum run on open.

use crate::Error;
use tokio_rusqlite::{Connection, params};

/// A numbered schema step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Applied in ascending `version` order. Versions are never reused.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "cache_generations",
        sql: include_str!("../../migrations/001_cache_generations.sql"),
    },
    Migration { version: 2, name: "mutation_queue", sql: include_str!("../../migrations/002_mutation_queue.sql") },
];

/// Bring the schema up to the latest version.
///
/// Each pending migration runs in its own transaction together with its
/// `_migrations` row, so a failed step leaves the previous version intact.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` naming the step that failed.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current: i64 =
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            let failed = |e: tokio_rusqlite::rusqlite::Error| {
                Error::MigrationFailed(format!("{} ({}): {e}", migration.version, migration.name))
            };
            let tx = conn.transaction().map_err(failed)?;
            tx.execute_batch(migration.sql).map_err(failed)?;
            tx.execute(
                "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(failed)?;
            tx.commit().map_err(failed)?;
            tracing::debug!(version = migration.version, name = migration.name, "Applied migration");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
