use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::config::APP_DIR;
use crate::models::{Session, SessionUser};

/// Local store for settings and the signed-in session.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| anyhow!("Database connection poisoned"))
}

impl Database {
    pub async fn new() -> Result<Self> {
        let path = Self::db_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        tracing::debug!("Opened local database at {}", path.display());

        Ok(db)
    }

    /// Create an in-memory database (used for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn db_path() -> Result<PathBuf> {
        let data_dir = match std::env::var("XDG_DATA_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = std::env::var("HOME").context("HOME not set")?;
                PathBuf::from(home).join(".local/share")
            }
        };
        Ok(data_dir.join(APP_DIR).join(format!("{}.db", APP_DIR)))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = lock(&self.conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                "CREATE TABLE session (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    user_id TEXT NOT NULL,
                    email TEXT,
                    full_name TEXT,
                    access_token TEXT NOT NULL,
                    refresh_token TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                UPDATE schema_version SET version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let result: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(result)
        })
        .await?
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    // --- Session ---

    pub async fn save_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.clone();
        let session = session.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO session (id, user_id, email, full_name, access_token, refresh_token, expires_at, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    user_id = ?1, email = ?2, full_name = ?3, access_token = ?4,
                    refresh_token = ?5, expires_at = ?6, updated_at = ?7",
                params![
                    session.user.id,
                    session.user.email,
                    session.user.full_name,
                    session.access_token,
                    session.refresh_token,
                    session.expires_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn load_session(&self) -> Result<Option<Session>> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT user_id, email, full_name, access_token, refresh_token, expires_at
                 FROM session WHERE id = 1",
            )?;
            let mut rows = stmt.query([])?;
            let session = match rows.next()? {
                Some(row) => Some(Self::row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await?
    }

    pub async fn clear_session(&self) -> Result<()> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute("DELETE FROM session", [])?;
            Ok(())
        })
        .await?
    }

    // --- Row helpers ---

    fn row_to_session(row: &rusqlite::Row) -> Result<Session> {
        let expires_str: String = row.get(5)?;
        Ok(Session {
            user: SessionUser {
                id: row.get(0)?,
                email: row.get(1)?,
                full_name: row.get(2)?,
            },
            access_token: row.get(3)?,
            refresh_token: row.get(4)?,
            expires_at: DateTime::parse_from_rfc3339(&expires_str)
                .context("Invalid session expiry")?
                .with_timezone(&Utc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::session;

    #[tokio::test]
    async fn test_schema_initialization() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.get_setting("missing").await.unwrap().is_none());
        assert!(db.load_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let db = Database::new_in_memory().unwrap();
        db.set_setting("k", "one").await.unwrap();
        db.set_setting("k", "two").await.unwrap();
        assert_eq!(db.get_setting("k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_session_persistence() {
        let db = Database::new_in_memory().unwrap();
        let mut stored = session("u1", 3600);
        stored.user.full_name = Some("Visitor One".into());
        db.save_session(&stored).await.unwrap();

        let loaded = db.load_session().await.unwrap().unwrap();
        assert_eq!(loaded.user, stored.user);
        assert_eq!(loaded.access_token, stored.access_token);
        assert_eq!(loaded.expires_at.timestamp(), stored.expires_at.timestamp());

        // A second save replaces the single row.
        let other = session("u2", 60);
        db.save_session(&other).await.unwrap();
        assert_eq!(db.load_session().await.unwrap().unwrap().user.id, "u2");

        db.clear_session().await.unwrap();
        assert!(db.load_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::new_in_memory().unwrap();
        db.set_setting("k", "v").await.unwrap();
        db.run_migrations().unwrap();
        assert_eq!(db.get_setting("k").await.unwrap().as_deref(), Some("v"));
    }
}
