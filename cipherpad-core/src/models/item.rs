//! User-owned ciphertext items and their store.

use crate::db::Db;
use crate::error::{Error, Result};
use crate::models::{datetime_from_nanos, datetime_to_nanos, epoch, timestamp, MIN_ID_LENGTH};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Content type marking an item as a user-installed extension.
pub const EXTENSION_CONTENT_TYPE: &str = "SF|Extension";

/// The maximum amount of user items to return in a page query.
pub const USER_ITEM_MAX_PAGE_SIZE: usize = 1000;

/// An opaque, user-owned payload. `content` is ciphertext; the server never
/// inspects it beyond the extension-metadata probe. UUIDs originate
/// client-side; the server mints one only for conflict copies.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub user_uuid: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub enc_item_key: String,
    #[serde(default)]
    pub auth_hash: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default = "epoch", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "epoch", with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

// Deleted items must omit the payload keys entirely; a widely deployed
// client parser chokes on `"content": ""`.
impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let fields = if self.deleted { 6 } else { 9 };
        let mut s = serializer.serialize_struct("Item", fields)?;
        s.serialize_field("uuid", &self.uuid)?;
        s.serialize_field("user_uuid", &self.user_uuid)?;
        if !self.deleted {
            s.serialize_field("content", &self.content)?;
        }
        s.serialize_field("content_type", &self.content_type)?;
        if !self.deleted {
            s.serialize_field("enc_item_key", &self.enc_item_key)?;
            s.serialize_field("auth_hash", &self.auth_hash)?;
        }
        s.serialize_field("deleted", &self.deleted)?;
        s.serialize_field(
            "created_at",
            &self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        s.serialize_field(
            "updated_at",
            &self.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        s.end()
    }
}

/// Callback cadence declared inside an extension item's content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Never,
    Realtime,
    Hourly,
    Daily,
}

/// The slice of an extension item's content the server acts on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentMetadata {
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub url: String,
}

impl Item {
    /// Decode the extension metadata carried in `content`
    /// (base64-wrapped JSON). Anything undecodable answers `None`.
    pub fn decoded_content_metadata(&self) -> Option<ContentMetadata> {
        if self.content.is_empty() {
            return None;
        }
        let raw = BASE64_STANDARD.decode(&self.content).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn is_daily_backup_extension(&self) -> bool {
        if self.content_type != EXTENSION_CONTENT_TYPE {
            return false;
        }
        self.decoded_content_metadata()
            .is_some_and(|meta| meta.frequency == Frequency::Daily)
    }

    /// Reconcile an incoming update into `self`. `uuid`, `user_uuid`, and
    /// `content_type` are immutable; payload fields are assigned only when
    /// non-empty; timestamps are never taken from the incoming item.
    pub fn merge_protected(&mut self, incoming: &Item) -> Result<()> {
        if self.uuid != incoming.uuid
            || self.user_uuid != incoming.user_uuid
            || self.content_type != incoming.content_type
        {
            return Err(Error::internal("cannot merge items, protected fields differ"));
        }
        if !incoming.content.is_empty() {
            self.content = incoming.content.clone();
        }
        if !incoming.enc_item_key.is_empty() {
            self.enc_item_key = incoming.enc_item_key.clone();
        }
        if !incoming.auth_hash.is_empty() {
            self.auth_hash = incoming.auth_hash.clone();
        }
        if self.deleted != incoming.deleted {
            self.deleted = incoming.deleted;
        }
        Ok(())
    }
}

/// Digest over the items' update timestamps, used by clients to detect
/// drift. Timestamps are rendered as integer milliseconds and sorted
/// descending as strings; the lexicographic sort is what deployed clients
/// compute, so it must not be "fixed" to a numeric one.
pub fn compute_hash_digest(items: &[Item]) -> String {
    let mut timestamps: Vec<String> = items
        .iter()
        .map(|item| item.updated_at.timestamp_millis().to_string())
        .collect();
    timestamps.sort_unstable_by(|a, b| b.cmp(a));
    hex::encode(Sha256::digest(timestamps.join(",").as_bytes()))
}

/// CRUD, page queries, and soft deletion over the `items` table.
#[derive(Clone)]
pub struct ItemStore {
    db: Db,
}

impl ItemStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create or update, depending on whether the UUID is known.
    pub fn save(&self, item: &mut Item) -> Result<()> {
        if item.uuid.is_empty() || !self.exists(&item.uuid)? {
            self.create(item)
        } else {
            self.update(item)
        }
    }

    pub fn create(&self, item: &mut Item) -> Result<()> {
        if item.user_uuid.len() < MIN_ID_LENGTH {
            return Err(Error::validation("item user_uuid invalid"));
        }
        if item.uuid.is_empty() {
            item.uuid = Uuid::new_v4().to_string();
        }
        item.created_at = Utc::now();
        item.updated_at = item.created_at;
        tracing::debug!(uuid = %item.uuid, "creating item");

        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO items (
                uuid, user_uuid, content, content_type, enc_item_key,
                auth_hash, deleted, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                item.uuid,
                item.user_uuid,
                item.content,
                item.content_type,
                item.enc_item_key,
                item.auth_hash,
                item.deleted,
                datetime_to_nanos(item.created_at),
                datetime_to_nanos(item.updated_at),
            ],
        )
        .map_err(Error::from)?;
        Ok(())
    }

    pub fn update(&self, item: &mut Item) -> Result<()> {
        item.updated_at = Utc::now();
        tracing::debug!(uuid = %item.uuid, "updating item");

        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE items
             SET content = ?1, content_type = ?2, enc_item_key = ?3,
                 auth_hash = ?4, deleted = ?5, updated_at = ?6
             WHERE uuid = ?7 AND user_uuid = ?8",
            rusqlite::params![
                item.content,
                item.content_type,
                item.enc_item_key,
                item.auth_hash,
                item.deleted,
                datetime_to_nanos(item.updated_at),
                item.uuid,
                item.user_uuid,
            ],
        )
        .map_err(Error::from)?;
        Ok(())
    }

    /// Soft delete: the row stays so other replicas converge, but the
    /// payload is emptied.
    pub fn delete(&self, item: &mut Item) -> Result<()> {
        if item.uuid.is_empty() {
            return Err(Error::validation("cannot delete an item without uuid"));
        }
        item.content = String::new();
        item.enc_item_key = String::new();
        item.auth_hash = String::new();
        item.deleted = true;
        item.updated_at = Utc::now();

        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE items
             SET content = '', enc_item_key = '', auth_hash = '',
                 deleted = 1, updated_at = ?1
             WHERE uuid = ?2 AND user_uuid = ?3",
            rusqlite::params![datetime_to_nanos(item.updated_at), item.uuid, item.user_uuid],
        )
        .map_err(Error::from)?;
        Ok(())
    }

    /// Persist a duplicate under a freshly minted UUID. The conflict path
    /// uses this so a rejected value survives as a distinct item.
    pub fn copy(&self, item: &Item) -> Result<Item> {
        let mut dupe = item.clone();
        dupe.uuid = String::new();
        self.create(&mut dupe)?;
        Ok(dupe)
    }

    pub fn exists(&self, uuid: &str) -> Result<bool> {
        if uuid.is_empty() {
            return Ok(false);
        }
        let conn = self.db.conn()?;
        let found: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM items WHERE uuid = ?1)",
                [uuid],
                |row| row.get(0),
            )
            .map_err(Error::from)?;
        Ok(found)
    }

    pub fn load_by_uuid(&self, uuid: &str) -> Result<Item> {
        if uuid.is_empty() {
            return Err(Error::validation("uuid is empty"));
        }
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("{ITEM_COLUMNS} WHERE uuid = ?1"),
            [uuid],
            row_to_item,
        )
        .map_err(Error::from)
    }

    /// Page of a user's items with `updated_at` after (or at, when `gte`)
    /// the given time, ascending. Queries `limit + 1` rows; the extra row
    /// only signals that more pages exist and is not returned.
    pub fn load_items_after(
        &self,
        user_uuid: &str,
        after: DateTime<Utc>,
        gte: bool,
        content_type: &str,
        limit: usize,
    ) -> Result<(Vec<Item>, bool)> {
        let cmp = if gte { ">=" } else { ">" };
        let nanos = datetime_to_nanos(after);
        let probe = (limit + 1) as i64;
        let conn = self.db.conn()?;

        let found = if content_type.is_empty() {
            let mut stmt = conn
                .prepare(&format!(
                    "{ITEM_COLUMNS} WHERE user_uuid = ?1 AND updated_at {cmp} ?2
                     ORDER BY updated_at ASC LIMIT ?3"
                ))
                .map_err(Error::from)?;
            collect_items(stmt.query_map(rusqlite::params![user_uuid, nanos, probe], row_to_item))?
        } else {
            let mut stmt = conn
                .prepare(&format!(
                    "{ITEM_COLUMNS} WHERE user_uuid = ?1 AND updated_at {cmp} ?2
                     AND content_type = ?3 ORDER BY updated_at ASC LIMIT ?4"
                ))
                .map_err(Error::from)?;
            collect_items(stmt.query_map(
                rusqlite::params![user_uuid, nanos, content_type, probe],
                row_to_item,
            ))?
        };

        Ok(truncate_page(found, limit))
    }

    /// First page of a user's live items, ascending. Used for initial syncs.
    pub fn load_all_items(
        &self,
        user_uuid: &str,
        content_type: &str,
        limit: usize,
    ) -> Result<(Vec<Item>, bool)> {
        let probe = (limit + 1) as i64;
        let conn = self.db.conn()?;

        let found = if content_type.is_empty() {
            let mut stmt = conn
                .prepare(&format!(
                    "{ITEM_COLUMNS} WHERE user_uuid = ?1 AND deleted = 0
                     ORDER BY updated_at ASC LIMIT ?2"
                ))
                .map_err(Error::from)?;
            collect_items(stmt.query_map(rusqlite::params![user_uuid, probe], row_to_item))?
        } else {
            let mut stmt = conn
                .prepare(&format!(
                    "{ITEM_COLUMNS} WHERE user_uuid = ?1 AND deleted = 0
                     AND content_type = ?2 ORDER BY updated_at ASC LIMIT ?3"
                ))
                .map_err(Error::from)?;
            collect_items(stmt.query_map(
                rusqlite::params![user_uuid, content_type, probe],
                row_to_item,
            ))?
        };

        Ok(truncate_page(found, limit))
    }

    /// Live items with a content type, the integrity-digest input.
    pub fn load_active_items(&self, user_uuid: &str) -> Result<Vec<Item>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{ITEM_COLUMNS} WHERE user_uuid = ?1 AND content_type != ''
                 AND deleted = 0 ORDER BY updated_at DESC"
            ))
            .map_err(Error::from)?;
        collect_items(stmt.query_map([user_uuid], row_to_item))
    }

    /// The user's installed, live extension items.
    pub fn load_active_extension_items(&self, user_uuid: &str) -> Result<Vec<Item>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{ITEM_COLUMNS} WHERE user_uuid = ?1 AND content_type = ?2
                 AND deleted = 0 ORDER BY updated_at DESC"
            ))
            .map_err(Error::from)?;
        collect_items(stmt.query_map([user_uuid, EXTENSION_CONTENT_TYPE], row_to_item))
    }
}

const ITEM_COLUMNS: &str = "SELECT uuid, user_uuid, content, content_type, enc_item_key, \
     auth_hash, deleted, created_at, updated_at FROM items";

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        uuid: row.get(0)?,
        user_uuid: row.get(1)?,
        content: row.get(2)?,
        content_type: row.get(3)?,
        enc_item_key: row.get(4)?,
        auth_hash: row.get(5)?,
        deleted: row.get(6)?,
        created_at: datetime_from_nanos(row.get(7)?),
        updated_at: datetime_from_nanos(row.get(8)?),
    })
}

fn collect_items<F>(rows: rusqlite::Result<rusqlite::MappedRows<'_, F>>) -> Result<Vec<Item>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<Item>,
{
    rows.map_err(Error::from)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Error::from)
}

fn truncate_page(mut found: Vec<Item>, limit: usize) -> (Vec<Item>, bool) {
    let more = found.len() > limit;
    if more {
        found.truncate(limit);
    }
    (found, more)
}
