//! SQLite handle shared by the user and item stores.

use crate::crypto;
use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Thread-safe database handle. Timestamps are stored as UTC nanosecond
/// integers so pagination tokens round-trip exactly.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
            .map_err(Error::from)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::from)?;
        conn.execute("PRAGMA foreign_keys = ON", [])
            .map_err(Error::from)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Apply every migration newer than the database's `user_version`.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        let current: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(Error::from)?;

        for migration in MIGRATIONS {
            if migration.version <= current {
                continue;
            }
            tracing::debug!(version = migration.version, "applying migration");
            (migration.up)(&conn).map_err(Error::from)?;
            conn.pragma_update(None, "user_version", migration.version)
                .map_err(Error::from)?;
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::internal(format!("lock error: {e}")))
    }
}

struct Migration {
    version: i64,
    up: fn(&Connection) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        up: create_base_schema,
    },
    Migration {
        version: 2,
        up: backfill_password_salts,
    },
];

fn create_base_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            uuid TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            pw_func TEXT NOT NULL DEFAULT '',
            pw_alg TEXT NOT NULL DEFAULT '',
            pw_cost INTEGER NOT NULL DEFAULT 0,
            pw_key_size INTEGER NOT NULL DEFAULT 0,
            pw_nonce TEXT NOT NULL DEFAULT '',
            pw_salt TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS items (
            uuid TEXT PRIMARY KEY,
            user_uuid TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL DEFAULT '',
            enc_item_key TEXT NOT NULL DEFAULT '',
            auth_hash TEXT NOT NULL DEFAULT '',
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);
        CREATE INDEX IF NOT EXISTS idx_items_user ON items(user_uuid);
        CREATE INDEX IF NOT EXISTS idx_items_user_content_type
            ON items(user_uuid, content_type);
        CREATE INDEX IF NOT EXISTS idx_items_updated_at ON items(updated_at);",
    )
}

// Databases from before salts were stored derive them from email + nonce.
fn backfill_password_salts(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt =
        conn.prepare("SELECT uuid, email, pw_nonce FROM users WHERE pw_salt = ''")?;
    let users: Vec<(String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (uuid, email, nonce) in users {
        if email.is_empty() || nonce.is_empty() {
            continue;
        }
        conn.execute(
            "UPDATE users SET pw_salt = ?1 WHERE uuid = ?2",
            rusqlite::params![crypto::salt(&email, &nonce), uuid],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_lands_on_latest_version() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn().unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);

        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn migrate_is_idempotent() {
        let db = Db::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.migrate().unwrap();
    }

    #[test]
    fn saltless_users_are_backfilled() {
        let db = Db::open_in_memory().unwrap();
        {
            let conn = db.conn().unwrap();
            conn.execute(
                "INSERT INTO users (uuid, email, password, pw_nonce, created_at, updated_at)
                 VALUES ('u-1', 'old@local.test', 'hash', 'old-nonce', 0, 0)",
                [],
            )
            .unwrap();
            // pretend this row predates stored salts
            conn.pragma_update(None, "user_version", 1).unwrap();
        }
        db.migrate().unwrap();

        let conn = db.conn().unwrap();
        let salt: String = conn
            .query_row("SELECT pw_salt FROM users WHERE uuid = 'u-1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(salt, crypto::salt("old@local.test", "old-nonce"));
    }
}
