// src/store/mod.rs
// Embedded relational persistence - single connection, single writer

pub mod schema;
pub mod types;

use crate::error::Result;
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
pub use types::{MessageRecord, StoreStats, ThreadRecord, UserRecord};

/// Maintenance cadence: WAL checkpoint + old-message pruning.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Messages older than this are pruned by the maintenance pass.
const MESSAGE_RETENTION_DAYS: i64 = 7;

/// Store wrapper around a single SQLite connection.
///
/// All access serializes through the connection mutex, which makes this a
/// single-writer store by construction. Statements go through
/// `prepare_cached` so each is compiled once per connection.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) and migrate the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA synchronous=NORMAL; \
             PRAGMA foreign_keys=ON; \
             PRAGMA cache_size=-2000; \
             PRAGMA temp_store=MEMORY; \
             PRAGMA busy_timeout=5000;",
        )?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Messages ──────────────────────────────────────────────────────

    /// Insert a message; duplicate ids are ignored (the dispatcher dedups
    /// upstream, the constraint is the backstop for invariant §8.4).
    pub fn save_message(
        &self,
        id: &str,
        thread_id: i64,
        sender_id: i64,
        text: Option<&str>,
        is_e2ee: bool,
        timestamp_ms: i64,
    ) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO messages (id, thread_id, sender_id, text, is_e2ee, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![id, thread_id, sender_id, text, is_e2ee, timestamp_ms])?;
        Ok(())
    }

    /// Recent messages for a thread, newest first.
    pub fn get_messages(&self, thread_id: i64, limit: u32) -> Result<Vec<MessageRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, thread_id, sender_id, text, is_e2ee, timestamp, created_at
             FROM messages WHERE thread_id = ?1
             ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![thread_id, limit], |row| {
            Ok(MessageRecord {
                id: row.get(0)?,
                thread_id: row.get(1)?,
                sender_id: row.get(2)?,
                text: row.get(3)?,
                is_e2ee: row.get(4)?,
                timestamp_ms: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // ── Threads ───────────────────────────────────────────────────────

    /// Upsert on first event referencing the thread; bumps updated_at and
    /// fills the name when one arrives later.
    pub fn ensure_thread(&self, id: i64, name: Option<&str>, is_group: bool) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO threads (id, name, is_group) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 name = COALESCE(excluded.name, threads.name),
                 is_group = excluded.is_group,
                 updated_at = CURRENT_TIMESTAMP",
        )?;
        stmt.execute(params![id, name, is_group])?;
        Ok(())
    }

    pub fn get_thread(&self, id: i64) -> Result<Option<ThreadRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, is_group, prefix, language, enabled, created_at, updated_at
             FROM threads WHERE id = ?1",
        )?;
        Ok(stmt.query_row([id], row_to_thread).optional()?)
    }

    /// Threads by recent activity.
    pub fn list_threads(&self, limit: u32, offset: u32) -> Result<Vec<ThreadRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, is_group, prefix, language, enabled, created_at, updated_at
             FROM threads ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], row_to_thread)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn set_thread_prefix(&self, id: i64, prefix: &str) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "UPDATE threads SET prefix = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )?;
        stmt.execute(params![id, prefix])?;
        Ok(())
    }

    pub fn set_thread_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "UPDATE threads SET enabled = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )?;
        stmt.execute(params![id, enabled])?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn ensure_user(&self, id: i64, name: Option<&str>) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO users (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                 name = COALESCE(excluded.name, users.name),
                 updated_at = CURRENT_TIMESTAMP",
        )?;
        stmt.execute(params![id, name])?;
        Ok(())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, username, profile_pic, is_admin, is_blocked, first_seen, updated_at
             FROM users WHERE id = ?1",
        )?;
        Ok(stmt.query_row([id], row_to_user).optional()?)
    }

    pub fn list_users(&self, limit: u32, offset: u32) -> Result<Vec<UserRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, username, profile_pic, is_admin, is_blocked, first_seen, updated_at
             FROM users ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], row_to_user)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn set_admin(&self, id: i64, is_admin: bool) -> Result<()> {
        self.ensure_user(id, None)?;
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "UPDATE users SET is_admin = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )?;
        stmt.execute(params![id, is_admin])?;
        Ok(())
    }

    pub fn set_blocked(&self, id: i64, is_blocked: bool) -> Result<()> {
        self.ensure_user(id, None)?;
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "UPDATE users SET is_blocked = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )?;
        stmt.execute(params![id, is_blocked])?;
        Ok(())
    }

    pub fn is_blocked(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT is_blocked FROM users WHERE id = ?1")?;
        Ok(stmt
            .query_row([id], |row| row.get::<_, bool>(0))
            .optional()?
            .unwrap_or(false))
    }

    // ── Settings ──────────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT value FROM settings WHERE key = ?1")?;
        Ok(stmt
            .query_row([key], |row| row.get::<_, String>(0))
            .optional()?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;
        stmt.execute(params![key, value])?;
        Ok(())
    }

    // ── Stats & maintenance ───────────────────────────────────────────

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn();
        let count = |sql: &str| -> rusqlite::Result<u64> {
            conn.prepare_cached(sql)?.query_row([], |row| row.get(0))
        };
        Ok(StoreStats {
            messages: count("SELECT COUNT(*) FROM messages")?,
            threads: count("SELECT COUNT(*) FROM threads")?,
            users: count("SELECT COUNT(*) FROM users")?,
        })
    }

    /// One maintenance pass: checkpoint the WAL and prune old messages.
    /// Failures are logged, never fatal.
    pub fn run_maintenance(&self) {
        let conn = self.conn();
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)") {
            warn!("WAL checkpoint failed: {}", e);
        }
        let cutoff = format!("-{MESSAGE_RETENTION_DAYS} days");
        match conn.execute(
            "DELETE FROM messages WHERE created_at < datetime('now', ?1)",
            [cutoff],
        ) {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "Pruned old messages"),
            Err(e) => warn!("Message pruning failed: {}", e),
        }
    }

    /// Periodic maintenance loop; runs until shutdown flips.
    pub async fn maintenance_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!("Store maintenance loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {
                    let store = self.clone();
                    // The pass holds the connection mutex; keep it off the
                    // async worker threads.
                    let _ = tokio::task::spawn_blocking(move || store.run_maintenance()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Store maintenance loop stopped");
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRecord> {
    Ok(ThreadRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        is_group: row.get(2)?,
        prefix: row.get(3)?,
        language: row.get(4)?,
        enabled: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        profile_picture: row.get(3)?,
        is_admin: row.get(4)?,
        is_blocked: row.get(5)?,
        first_seen: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
