//! Post-sync notification jobs.
//!
//! Dispatch is best-effort by design: a failed callback never fails the
//! sync that triggered it, and nothing is retried.

use crate::db::Db;
use crate::error::{Error, Result};
use crate::models::{make_pw_gen_params, ItemStore, UserStore};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionJobParams {
    pub url: String,
    pub item_ids: Vec<String>,
    pub user_id: String,
    pub extension_id: String,
}

#[derive(Debug, Clone)]
pub struct MailerJobParams {
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct RegistrationJobParams {
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Outbound job transport. The sync engine and auth flows only know this
/// interface; in-process spawning and an external queue are both valid
/// implementations.
pub trait JobDispatcher: Send + Sync {
    fn perform_extension_job(&self, params: ExtensionJobParams) -> Result<()>;
    fn perform_mailer_job(&self, params: MailerJobParams) -> Result<()>;
    fn perform_registration_job(&self, params: RegistrationJobParams) -> Result<()>;
}

/// A backup payload prepared for the mailer: the user's live items plus the
/// auth params needed to decrypt them client-side.
#[derive(Debug, Clone)]
pub struct BackupAttachment {
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Assemble the mail-backup attachment for a user.
pub fn build_mail_backup(
    users: &UserStore,
    items: &ItemStore,
    user_id: &str,
) -> Result<BackupAttachment> {
    let user = users.load_by_uuid(user_id)?;
    let active = items.load_active_items(&user.uuid)?;
    let contents = serde_json::json!({
        "items": active,
        "auth_params": make_pw_gen_params(&user),
    });
    Ok(BackupAttachment {
        filename: format!("SN-Data-{}.txt", Utc::now().format("%Y%m%d%H%M%S")),
        mime_type: "application/json".to_string(),
        content: serde_json::to_vec(&contents)
            .map_err(|e| Error::internal(format!("could not encode backup: {e}")))?,
    })
}

/// Dispatcher POSTing extension callbacks over HTTP from spawned tasks, so
/// the request path never waits on a third-party endpoint.
pub struct HttpJobDispatcher {
    client: reqwest::Client,
    users: UserStore,
    items: ItemStore,
}

impl HttpJobDispatcher {
    pub fn new(db: Db) -> Self {
        Self {
            client: reqwest::Client::new(),
            users: UserStore::new(db.clone()),
            items: ItemStore::new(db),
        }
    }
}

impl JobDispatcher for HttpJobDispatcher {
    fn perform_extension_job(&self, params: ExtensionJobParams) -> Result<()> {
        let client = self.client.clone();
        tokio::spawn(async move {
            let url = params.url.clone();
            match client.post(&url).json(&params).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(%url, "extension callback delivered");
                }
                Ok(resp) => {
                    tracing::error!(%url, status = %resp.status(), "extension callback rejected");
                }
                Err(e) => {
                    tracing::error!(%url, error = %e, "extension callback failed");
                }
            }
        });
        Ok(())
    }

    fn perform_mailer_job(&self, params: MailerJobParams) -> Result<()> {
        let attachment = build_mail_backup(&self.users, &self.items, &params.user_id)?;
        // TODO: hand the attachment to a mail transport once one is configured.
        tracing::info!(
            user = %params.user_id,
            filename = %attachment.filename,
            bytes = attachment.content.len(),
            "prepared mail backup attachment"
        );
        Ok(())
    }

    fn perform_registration_job(&self, params: RegistrationJobParams) -> Result<()> {
        tracing::info!(email = %params.email, created_at = %params.created_at, "user registered");
        Ok(())
    }
}
