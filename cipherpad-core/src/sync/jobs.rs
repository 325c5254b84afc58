//! Post-sync job fan-out to installed user extensions.

use crate::error::Result;
use crate::jobs::{ExtensionJobParams, JobDispatcher, MailerJobParams};
use crate::models::item::Frequency;
use crate::models::{Item, ItemStore, User};

const EMAIL_ARCHIVE_SUB_TYPE: &str = "backup.email_archive";

/// Notify every realtime extension about the items the client just sent.
/// Dispatch failures are logged and swallowed; a dead callback endpoint must
/// not fail the sync.
pub(crate) fn enqueue_realtime_extension_jobs(
    items: &ItemStore,
    dispatcher: &dyn JobDispatcher,
    user: &User,
    incoming: &[Item],
) -> Result<()> {
    if incoming.is_empty() {
        return Ok(());
    }
    let extensions = items.load_active_extension_items(&user.uuid)?;
    for ext in &extensions {
        let Some(meta) = ext.decoded_content_metadata() else {
            continue;
        };
        if meta.frequency != Frequency::Realtime || meta.url.is_empty() {
            continue;
        }
        let params = ExtensionJobParams {
            url: meta.url.clone(),
            item_ids: incoming.iter().map(|item| item.uuid.clone()).collect(),
            user_id: user.uuid.clone(),
            extension_id: ext.uuid.clone(),
        };
        if let Err(e) = dispatcher.perform_extension_job(params) {
            tracing::error!(extension = %ext.uuid, error = %e, "could not enqueue realtime extension job");
        }
    }
    Ok(())
}

/// Trigger daily-backup work for any backup extensions the client just
/// saved. Email archives go to the mailer; everything else gets a callback.
pub(crate) fn enqueue_daily_backup_extension_jobs(dispatcher: &dyn JobDispatcher, saved: &[Item]) {
    for item in saved {
        if !item.is_daily_backup_extension() || item.deleted {
            continue;
        }
        let Some(meta) = item.decoded_content_metadata() else {
            continue;
        };
        let outcome = if meta.sub_type == EMAIL_ARCHIVE_SUB_TYPE {
            dispatcher.perform_mailer_job(MailerJobParams {
                user_id: item.user_uuid.clone(),
            })
        } else if meta.frequency == Frequency::Daily && !meta.url.is_empty() {
            dispatcher.perform_extension_job(ExtensionJobParams {
                url: meta.url.clone(),
                item_ids: Vec::new(),
                user_id: item.user_uuid.clone(),
                extension_id: item.uuid.clone(),
            })
        } else {
            Ok(())
        };
        if let Err(e) = outcome {
            tracing::error!(item = %item.uuid, error = %e, "could not enqueue daily backup job");
        }
    }
}
