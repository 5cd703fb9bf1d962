// src/store/schema.rs
// Database schema and versioned migrations

use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

/// Base schema. CREATE IF NOT EXISTS keeps a fresh open idempotent; the
/// versioned migrations below evolve databases created by older builds.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    thread_id INTEGER NOT NULL,
    sender_id INTEGER NOT NULL,
    text TEXT,
    is_e2ee INTEGER NOT NULL DEFAULT 0,
    timestamp INTEGER NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_messages_thread_time ON messages(thread_id, timestamp);

CREATE TABLE IF NOT EXISTS threads (
    id INTEGER PRIMARY KEY,
    name TEXT,
    is_group INTEGER NOT NULL DEFAULT 0,
    prefix TEXT NOT NULL DEFAULT '!',
    language TEXT NOT NULL DEFAULT 'vi',
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name TEXT,
    username TEXT,
    profile_pic TEXT,
    is_admin INTEGER NOT NULL DEFAULT 0,
    is_blocked INTEGER NOT NULL DEFAULT 0,
    first_seen TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Ordered migration scripts. Each entry targets the version it produces;
/// on open, every migration above the stored `schema_version` runs in order.
const MIGRATIONS: &[(i64, &str)] = &[
    (1, SCHEMA),
    (
        2,
        "ALTER TABLE users ADD COLUMN username TEXT;
         ALTER TABLE users ADD COLUMN profile_pic TEXT;",
    ),
    (
        3,
        "ALTER TABLE threads ADD COLUMN language TEXT NOT NULL DEFAULT 'vi';",
    ),
];

/// Run all pending migrations. Benign re-application errors ("duplicate
/// column") are logged and skipped; anything else aborts startup.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let fresh = !table_exists(conn, "messages");
    conn.execute_batch(SCHEMA)?;

    if fresh {
        // A database created from the current base schema is already at the
        // latest shape; don't replay column adds against it.
        let latest = MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0);
        set_schema_version(conn, latest)?;
        return Ok(());
    }

    let current = schema_version(conn)?;
    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        match conn.execute_batch(sql) {
            Ok(()) => info!(version, "Applied schema migration"),
            Err(e) if is_benign_migration_error(&e) => {
                warn!(version, "Skipping already-applied migration: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
        set_schema_version(conn, *version)?;
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [version.to_string()],
    )?;
    Ok(())
}

/// "duplicate column name" and friends mean the migration already ran on a
/// database that predates version tracking.
fn is_benign_migration_error(err: &rusqlite::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("duplicate column") || message.contains("already exists")
}

fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
        [name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}
