//! The item reconciliation engine.
//!
//! One sync ingests a batch of proposed writes plus a pagination position,
//! detects UUID and timestamp conflicts, merges everything acceptable into
//! the store, and hands back page tokens and an optional integrity digest.
//! Conflicting concurrent syncs for the same user need no lock: the
//! timestamp comparison here is the synchronization primitive, and a lost
//! race surfaces as a sync conflict on the next request instead of a lost
//! write.

pub mod conflict;
mod jobs;

pub use conflict::ItemConflict;

use crate::error::{Error, Result};
use crate::jobs::JobDispatcher;
use crate::models::item::USER_ITEM_MAX_PAGE_SIZE;
use crate::models::{
    compute_hash_digest, datetime_from_nanos, datetime_to_nanos, Item, ItemStore, User,
    MIN_ID_LENGTH,
};
use base64::engine::general_purpose::URL_SAFE as BASE64_URL;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Two timestamps within this window count as the same write; clients and
/// server clocks drift. Changing it changes which updates conflict.
const MIN_CONFLICT_THRESHOLD: TimeDelta = TimeDelta::seconds(1);

/// An incoming sync request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub sync_token: String,
    #[serde(default)]
    pub cursor_token: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub compute_integrity: bool,
}

/// The outcome of a sync request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResponse {
    pub retrieved_items: Vec<Item>,
    pub saved_items: Vec<Item>,
    pub conflicts: Vec<ItemConflict>,
    pub sync_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cursor_token: String,
    pub integrity_hash: String,
}

/// Per-user reconciliation over an [`ItemStore`], notifying installed
/// extensions after each sync.
#[derive(Clone)]
pub struct SyncEngine {
    items: ItemStore,
    dispatcher: Arc<dyn JobDispatcher>,
}

enum CheckedItem {
    /// Not in the store yet; the incoming item will be created.
    Fresh,
    /// In the store and close enough in time to accept the update.
    Existing(Item),
    /// The stored copy wins.
    SyncConflict(Item),
    /// Existence could not be confirmed, likely an import collision.
    UuidConflict,
}

impl SyncEngine {
    pub fn new(items: ItemStore, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self { items, dispatcher }
    }

    /// Run one sync for the user: load the page, reconcile the incoming
    /// batch, emit tokens, fan out extension jobs, and optionally compute
    /// the integrity digest.
    pub fn sync_user_items(&self, user: &User, req: &SyncRequest) -> Result<SyncResponse> {
        if user.uuid.len() < MIN_ID_LENGTH {
            return Err(Error::validation("user id invalid"));
        }

        let mut res = SyncResponse::default();
        self.do_item_sync(user, req, &mut res)?;

        jobs::enqueue_realtime_extension_jobs(&self.items, self.dispatcher.as_ref(), user, &req.items)?;
        jobs::enqueue_daily_backup_extension_jobs(self.dispatcher.as_ref(), &res.saved_items);

        if !req.compute_integrity {
            return Ok(res);
        }
        let active = self.items.load_active_items(&user.uuid)?;
        res.integrity_hash = compute_hash_digest(&active);
        Ok(res)
    }

    fn do_item_sync(&self, user: &User, req: &SyncRequest, res: &mut SyncResponse) -> Result<()> {
        let limit = clamp_limit(req.limit);

        let (mut retrieved, _) = if !req.cursor_token.is_empty() {
            let date = decode_pagination_token(&req.cursor_token);
            self.items
                .load_items_after(&user.uuid, date, true, &req.content_type, limit)?
        } else if !req.sync_token.is_empty() {
            let date = decode_pagination_token(&req.sync_token);
            self.items
                .load_items_after(&user.uuid, date, false, &req.content_type, limit)?
        } else {
            self.items.load_all_items(&user.uuid, &req.content_type, limit)?
        };

        let mut saved: Vec<Item> = Vec::new();
        let mut conflicts: Vec<ItemConflict> = Vec::new();

        for incoming in &req.items {
            let mut incoming = incoming.clone();
            match self.find_check_item(&incoming)? {
                CheckedItem::UuidConflict => {
                    conflicts.push(ItemConflict::Uuid {
                        unsaved_item: incoming,
                    });
                }
                CheckedItem::SyncConflict(stored) => {
                    // Exclude the losing copy from this response so the
                    // client does not adopt it and immediately resync it.
                    retrieved.retain(|item| item.uuid != stored.uuid);
                    conflicts.push(ItemConflict::Sync {
                        server_item: stored,
                    });
                }
                CheckedItem::Fresh => {
                    let item = incoming.clone();
                    saved.push(self.accept_incoming(user, item, &mut incoming)?);
                }
                CheckedItem::Existing(stored) => {
                    saved.push(self.accept_incoming(user, stored, &mut incoming)?);
                }
            }
        }

        if retrieved.len() >= limit {
            if let Some(last) = retrieved.last() {
                res.cursor_token = encode_pagination_token(last.updated_at);
            }
        }

        let latest_update = match saved.last() {
            Some(last) => last.updated_at,
            None => Utc::now(),
        };
        // One microsecond past the last save, so the next `>` query cannot
        // return the same row again.
        res.sync_token = encode_pagination_token(latest_update + TimeDelta::microseconds(1));

        res.retrieved_items = retrieved;
        res.saved_items = saved;
        res.conflicts = conflicts;
        Ok(())
    }

    /// Re-run the daily-backup fan-out for the given items; the manual
    /// backup trigger uses this outside of a sync.
    pub fn enqueue_backup_jobs(&self, items: &[Item]) {
        jobs::enqueue_daily_backup_extension_jobs(self.dispatcher.as_ref(), items);
    }

    /// Persist an accepted incoming write into `item` (either the stored
    /// copy or the incoming item itself when it is new).
    fn accept_incoming(&self, user: &User, mut item: Item, incoming: &mut Item) -> Result<Item> {
        // The server is authoritative on ownership, whatever the batch says.
        item.user_uuid = user.uuid.clone();
        incoming.user_uuid = user.uuid.clone();
        item.merge_protected(incoming)?;

        self.items.save(&mut item)?;
        if item.deleted {
            self.items.delete(&mut item)?;
        }
        Ok(item)
    }

    /// Locate the incoming item in the store and classify the write.
    fn find_check_item(&self, incoming: &Item) -> Result<CheckedItem> {
        let already_exists = match self.items.exists(&incoming.uuid) {
            Ok(exists) => exists,
            // An unanswerable existence check is treated as a colliding
            // UUID, usually notes imported from another account.
            Err(_) => return Ok(CheckedItem::UuidConflict),
        };
        if !already_exists {
            return Ok(CheckedItem::Fresh);
        }

        let stored = self.items.load_by_uuid(&incoming.uuid)?;
        let diff = incoming
            .updated_at
            .signed_duration_since(stored.updated_at);

        // Equal timestamps mean an identical write; anything inside the
        // threshold is clock skew. Beyond that, older is stale data and
        // newer was manipulated somewhere; both lose to the server copy.
        if diff.is_zero() || diff.abs() < MIN_CONFLICT_THRESHOLD {
            Ok(CheckedItem::Existing(stored))
        } else {
            Ok(CheckedItem::SyncConflict(stored))
        }
    }
}

fn clamp_limit(limit: i64) -> usize {
    if limit <= 1 {
        USER_ITEM_MAX_PAGE_SIZE / 2
    } else if limit as usize > USER_ITEM_MAX_PAGE_SIZE {
        USER_ITEM_MAX_PAGE_SIZE
    } else {
        limit as usize
    }
}

const TOKEN_VERSION: &str = "2";

/// Render a point in time as an opaque page token.
pub fn encode_pagination_token(date: DateTime<Utc>) -> String {
    BASE64_URL.encode(format!("{TOKEN_VERSION}:{}", datetime_to_nanos(date)))
}

/// Recover the point in time from a page token. Malformed tokens degrade to
/// "start from now" instead of erroring; clients re-bootstrap cleanly from
/// that, which beats failing the whole sync over a corrupt cursor.
pub fn decode_pagination_token(token: &str) -> DateTime<Utc> {
    let decoded = match BASE64_URL.decode(token) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable pagination token");
            return Utc::now();
        }
    };
    let decoded = match String::from_utf8(decoded) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(error = %e, "non-utf8 pagination token");
            return Utc::now();
        }
    };
    let parts: Vec<&str> = decoded.split(':').collect();
    if parts.len() != 2 {
        tracing::debug!("expected 2 parts in decoded pagination token");
        return Utc::now();
    }
    match parts[1].parse::<i64>() {
        Ok(nanos) => datetime_from_nanos(nanos),
        Err(e) => {
            tracing::debug!(error = %e, "unparsable pagination token time");
            Utc::now()
        }
    }
}
