//! Item conflicts surfaced to the client.

use crate::models::Item;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// An item the sync engine refused to save. Conflicts are response payload,
/// not errors; the client decides what to do with the echoed item.
#[derive(Debug, Clone)]
pub enum ItemConflict {
    /// The server could not confirm ownership or existence of the UUID,
    /// usually data imported from another account. Carries the rejected
    /// incoming item.
    Uuid { unsaved_item: Item },
    /// The server copy disagrees beyond the clock-skew tolerance. The server
    /// copy wins and is echoed back.
    Sync { server_item: Item },
}

impl ItemConflict {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Uuid { .. } => "uuid_conflict",
            Self::Sync { .. } => "sync_conflict",
        }
    }

    pub fn item(&self) -> &Item {
        match self {
            Self::Uuid { unsaved_item } => unsaved_item,
            Self::Sync { server_item } => server_item,
        }
    }
}

// Client contract: `{"type": ..., "unsaved_item" | "server_item": ...}`.
impl Serialize for ItemConflict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            Self::Uuid { unsaved_item } => map.serialize_entry("unsaved_item", unsaved_item)?,
            Self::Sync { server_item } => map.serialize_entry("server_item", server_item)?,
        }
        map.serialize_entry("type", self.kind())?;
        map.end()
    }
}
