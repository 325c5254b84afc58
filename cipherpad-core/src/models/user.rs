//! The application's end user and its store.

use crate::crypto;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::models::{
    datetime_from_nanos, datetime_to_nanos, epoch, timestamp, validate_email, validate_password,
};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user identity plus the key-stretching parameters its clients use to
/// derive encryption and authentication keys. The `password` field holds the
/// hex SHA-256 of the client-supplied password hash -- plaintext passwords
/// never reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub pw_func: String,
    #[serde(default)]
    pub pw_alg: String,
    #[serde(default)]
    pub pw_cost: i64,
    #[serde(default)]
    pub pw_key_size: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pw_nonce: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pw_salt: String,
    #[serde(default = "epoch", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "epoch", with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Default for User {
    fn default() -> Self {
        Self::new()
    }
}

impl User {
    /// A User with the key-derivation defaults handed to v1-era clients.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            uuid: String::new(),
            email: String::new(),
            password: String::new(),
            pw_func: "pbkdf2".to_string(),
            pw_alg: "sha512".to_string(),
            pw_cost: 110_000,
            pw_key_size: 512,
            pw_nonce: String::new(),
            pw_salt: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Duplicate without the sensitive fields. This is the shape returned to
    /// clients.
    pub fn make_safer_copy(&self) -> User {
        let mut out = self.clone();
        out.password = String::new();
        out.pw_nonce = String::new();
        out
    }

    /// Compare a token's embedded password hash against the stored one.
    pub fn validate_password_hash(&self, hashed: &str) -> bool {
        hashed == self.password
    }
}

/// CRUD and lookups over the `users` table.
#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Persist a new user. The password is hashed here; callers supply the
    /// client-side hash as-is.
    pub fn create(&self, user: &mut User) -> Result<()> {
        if !user.uuid.is_empty() {
            return Err(Error::validation("cannot recreate existing user"));
        }
        validate_email(&user.email)?;
        if user.password.is_empty() {
            return Err(Error::validation("password cannot be empty"));
        }
        if self.exists(&user.email)? {
            return Err(Error::conflict("email is already registered"));
        }

        user.uuid = Uuid::new_v4().to_string();
        user.password = crypto::hash(&user.password);
        user.created_at = Utc::now();
        user.updated_at = user.created_at;

        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO users (
                uuid, email, password, pw_func, pw_alg, pw_cost, pw_key_size,
                pw_nonce, pw_salt, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                user.uuid,
                user.email,
                user.password,
                user.pw_func,
                user.pw_alg,
                user.pw_cost,
                user.pw_key_size,
                user.pw_nonce,
                user.pw_salt,
                datetime_to_nanos(user.created_at),
                datetime_to_nanos(user.updated_at),
            ],
        )
        .map_err(Error::from)?;
        Ok(())
    }

    /// Replace the password block atomically and bump `updated_at`. The
    /// `updates` password is expected to be hashed already.
    pub fn update(&self, user: &mut User, updates: &User) -> Result<()> {
        if user.uuid.is_empty() {
            return Err(Error::not_found("unknown user"));
        }

        user.password = updates.password.clone();
        user.pw_func = updates.pw_func.clone();
        user.pw_alg = updates.pw_alg.clone();
        user.pw_cost = updates.pw_cost;
        user.pw_key_size = updates.pw_key_size;
        user.pw_nonce = updates.pw_nonce.clone();
        user.pw_salt = updates.pw_salt.clone();
        user.updated_at = Utc::now();

        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE users
             SET password = ?1, pw_func = ?2, pw_alg = ?3, pw_cost = ?4,
                 pw_key_size = ?5, pw_nonce = ?6, pw_salt = ?7, updated_at = ?8
             WHERE uuid = ?9",
            rusqlite::params![
                user.password,
                user.pw_func,
                user.pw_alg,
                user.pw_cost,
                user.pw_key_size,
                user.pw_nonce,
                user.pw_salt,
                datetime_to_nanos(user.updated_at),
                user.uuid,
            ],
        )
        .map_err(Error::from)?;
        Ok(())
    }

    /// Whether the email has an account. Invalid emails answer `false`; the
    /// question asked here is presence, not validity.
    pub fn exists(&self, email: &str) -> Result<bool> {
        if validate_email(email).is_err() {
            return Ok(false);
        }
        let conn = self.db.conn()?;
        let found: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                [email],
                |row| row.get(0),
            )
            .map_err(Error::from)?;
        Ok(found)
    }

    pub fn load_by_uuid(&self, uuid: &str) -> Result<User> {
        if uuid.is_empty() {
            return Err(Error::validation("uuid is empty"));
        }
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("{USER_COLUMNS} WHERE uuid = ?1"),
            [uuid],
            row_to_user,
        )
        .map_err(Error::from)
    }

    pub fn load_by_email(&self, email: &str) -> Result<User> {
        validate_email(email)?;
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("{USER_COLUMNS} WHERE email = ?1"),
            [email],
            row_to_user,
        )
        .map_err(Error::from)
    }

    /// Lookup by email and (already hashed) password, the sign-in predicate.
    pub fn load_by_email_and_password(&self, email: &str, password: &str) -> Result<User> {
        validate_email(email)?;
        validate_password(password)?;
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("{USER_COLUMNS} WHERE email = ?1 AND password = ?2"),
            [email, password],
            row_to_user,
        )
        .map_err(Error::from)
    }
}

const USER_COLUMNS: &str = "SELECT uuid, email, password, pw_func, pw_alg, pw_cost, \
     pw_key_size, pw_nonce, pw_salt, created_at, updated_at FROM users";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        uuid: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        pw_func: row.get(3)?,
        pw_alg: row.get(4)?,
        pw_cost: row.get(5)?,
        pw_key_size: row.get(6)?,
        pw_nonce: row.get(7)?,
        pw_salt: row.get(8)?,
        created_at: datetime_from_nanos(row.get(9)?),
        updated_at: datetime_from_nanos(row.get(10)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn store() -> UserStore {
        UserStore::new(Db::open_in_memory().unwrap())
    }

    fn sample_user() -> User {
        let mut u = User::new();
        u.email = "someone@local.test".to_string();
        u.password = "client-hash-that-is-long-enough-to-pass".to_string();
        u.pw_nonce = "some-nonce".to_string();
        u
    }

    #[test]
    fn create_mints_uuid_and_hashes_password() {
        let store = store();
        let mut user = sample_user();
        store.create(&mut user).unwrap();

        assert_eq!(user.uuid.len(), 36);
        assert_eq!(user.password, crypto::hash("client-hash-that-is-long-enough-to-pass"));

        let loaded = store.load_by_uuid(&user.uuid).unwrap();
        assert_eq!(loaded.email, user.email);
        assert_eq!(loaded.password, user.password);
    }

    #[test]
    fn create_rejects_duplicate_email() {
        let store = store();
        let mut user = sample_user();
        store.create(&mut user).unwrap();

        let mut dupe = sample_user();
        let err = store.create(&mut dupe).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn create_rejects_existing_uuid_and_bad_input() {
        let store = store();

        let mut existing = sample_user();
        existing.uuid = "already-set".to_string();
        assert!(store.create(&mut existing).unwrap_err().is_validation());

        let mut bad_email = sample_user();
        bad_email.email = "nope".to_string();
        assert!(store.create(&mut bad_email).unwrap_err().is_validation());

        let mut no_password = sample_user();
        no_password.password = String::new();
        assert!(store.create(&mut no_password).unwrap_err().is_validation());
    }

    #[test]
    fn update_replaces_password_block() {
        let store = store();
        let mut user = sample_user();
        store.create(&mut user).unwrap();
        let before = user.updated_at;

        let mut updates = user.make_safer_copy();
        updates.password = crypto::hash("the-next-client-hash-is-also-long");
        updates.pw_nonce = "fresh-nonce".to_string();
        store.update(&mut user, &updates).unwrap();

        let loaded = store.load_by_uuid(&user.uuid).unwrap();
        assert_eq!(loaded.password, updates.password);
        assert_eq!(loaded.pw_nonce, "fresh-nonce");
        assert!(loaded.updated_at >= before);
    }

    #[test]
    fn update_requires_uuid() {
        let store = store();
        let mut user = sample_user();
        let updates = user.clone();
        assert!(store.update(&mut user, &updates).unwrap_err().is_not_found());
    }

    #[test]
    fn lookups_fail_with_capability_tags() {
        let store = store();
        assert!(store.load_by_uuid("").unwrap_err().is_validation());
        assert!(store.load_by_email("bad").unwrap_err().is_validation());
        assert!(store
            .load_by_email("ghost@local.test")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn exists_swallows_invalid_email() {
        let store = store();
        assert!(!store.exists("x").unwrap());
        assert!(!store.exists("ghost@local.test").unwrap());
    }

    #[test]
    fn serialization_hides_empty_secret_fields() {
        let mut user = sample_user();
        user.password = "hashed".to_string();

        let full = serde_json::to_value(&user).unwrap();
        assert_eq!(full["password"], "hashed");
        assert_eq!(full["pw_nonce"], "some-nonce");

        let safe = serde_json::to_value(user.make_safer_copy()).unwrap();
        let obj = safe.as_object().unwrap();
        assert!(!obj.contains_key("password"));
        assert!(!obj.contains_key("pw_nonce"));
        assert!(obj.contains_key("email"));
    }

    #[test]
    fn safer_copy_zeroes_secrets() {
        let mut user = sample_user();
        user.password = "hashed".to_string();
        let safe = user.make_safer_copy();
        assert!(safe.password.is_empty());
        assert!(safe.pw_nonce.is_empty());
        assert_eq!(safe.email, user.email);
    }
}
