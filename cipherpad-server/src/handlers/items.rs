//! Item sync and backup handlers.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use cipherpad_core::models::User;
use cipherpad_core::sync::SyncRequest;
use serde::Deserialize;
use serde_json::json;

/// POST /items/sync
pub async fn sync(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<SyncRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::debug!(user = %user.uuid, incoming = request.items.len(), "sync request");
    let response = state.engine.sync_user_items(&user, &request)?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Deserialize)]
pub struct BackupRequest {
    #[serde(default)]
    pub item_ids: Vec<String>,
}

/// POST /items/backup
///
/// Manual backup trigger: re-enqueues the daily-backup jobs for the posted
/// extension items. Unknown or foreign UUIDs are skipped, not errors.
pub async fn backup(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<BackupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut items = Vec::new();
    for id in &request.item_ids {
        match state.items.load_by_uuid(id) {
            Ok(item) if item.user_uuid == user.uuid => items.push(item),
            Ok(_) => continue,
            Err(e) if e.is_not_found() || e.is_validation() => continue,
            Err(e) => return Err(e.into()),
        }
    }

    state.engine.enqueue_backup_jobs(&items);
    Ok(Json(json!({ "enqueued": items.len() })))
}
