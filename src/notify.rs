//! Error classification side effects and user notifications.
//!
//! Everything here is fire-and-forget: a failure while recording a failure
//! must never take down the scheduler loop, so store errors are logged and
//! swallowed.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{ErrorKind, SyncError};
use crate::model::{
    MarketplaceAccount, NewNotification, NotificationChannel, NotificationKind, Task, TaskResult,
};
use crate::store::TaskStore;

#[derive(Clone)]
pub struct SyncErrorHandler {
    store: Arc<dyn TaskStore>,
}

impl SyncErrorHandler {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Record a task failure: always a `sync_failed` notification, plus
    /// kind-specific remediation.
    pub async fn handle_failure(
        &self,
        task: &Task,
        account: Option<&MarketplaceAccount>,
        sync_error: &SyncError,
    ) {
        error!(
            task = %task.id,
            owner = %task.owner_id,
            kind = ?sync_error.kind(),
            error = %sync_error,
            "sync task failed"
        );

        let data = json!({
            "task_id": task.id,
            "task_type": task.task_type.as_str(),
            "account_id": task.account_id,
            "error_details": sync_error.to_string(),
        });

        self.dispatch(
            task.owner_id,
            NotificationKind::SyncFailed,
            "Sync failed",
            &user_message(sync_error),
            data.clone(),
            None,
        )
        .await;

        match sync_error.kind() {
            ErrorKind::RateLimit => {
                info!(task = %task.id, "rate limited, backoff will retry");
            }
            ErrorKind::Network => {
                info!(task = %task.id, "transient network failure, backoff will retry");
            }
            ErrorKind::Auth => {
                if let Some(account) = account {
                    if let Err(err) = self.store.deactivate_account(account.id).await {
                        warn!(account = %account.id, error = %err, "failed to deactivate account");
                    } else {
                        info!(account = %account.id, "account deactivated after auth failure");
                    }
                    self.dispatch(
                        task.owner_id,
                        NotificationKind::SystemError,
                        "Marketplace API keys rejected",
                        "Check the API keys configured for your marketplace account",
                        data,
                        Some(&[NotificationChannel::InApp, NotificationChannel::Email]),
                    )
                    .await;
                }
            }
            ErrorKind::Validation => {
                self.dispatch(
                    task.owner_id,
                    NotificationKind::SystemError,
                    "Data validation error",
                    "Some marketplace data could not be validated during sync",
                    data,
                    None,
                )
                .await;
            }
            // The base message already tells the user to try later.
            ErrorKind::ProviderBlocked | ErrorKind::Unknown => {}
        }
    }

    /// Notify on completion, but only when something was actually synced.
    pub async fn handle_success(&self, task: &Task, result: &TaskResult) {
        if result.processed_items == 0 {
            return;
        }
        let message = if result.error_count == 0 {
            format!("Successfully processed {} items", result.success_count)
        } else {
            format!(
                "Processed {} items: {} succeeded, {} failed",
                result.processed_items, result.success_count, result.error_count
            )
        };
        self.dispatch(
            task.owner_id,
            NotificationKind::SyncCompleted,
            "Sync completed",
            &message,
            json!({
                "task_id": task.id,
                "task_type": task.task_type.as_str(),
                "account_id": task.account_id,
                "result": result,
            }),
            None,
        )
        .await;
    }

    /// One notification row per delivery channel. Forced channels skip the
    /// user's channel list but still honor the enabled flag.
    async fn dispatch(
        &self,
        owner_id: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
        data: serde_json::Value,
        forced_channels: Option<&[NotificationChannel]>,
    ) {
        let prefs = match self.store.notification_prefs(owner_id, kind).await {
            Ok(prefs) => prefs,
            Err(err) => {
                warn!(owner = %owner_id, error = %err, "notification prefs lookup failed");
                return;
            }
        };
        if let Some(prefs) = &prefs {
            if !prefs.enabled {
                return;
            }
        }
        let channels: Vec<NotificationChannel> = match forced_channels {
            Some(forced) => forced.to_vec(),
            None => prefs
                .map(|p| p.channels)
                .unwrap_or_else(|| vec![NotificationChannel::InApp]),
        };

        for channel in channels {
            let row = NewNotification {
                owner_id,
                kind,
                channel,
                title: title.to_string(),
                message: message.to_string(),
                data: data.clone(),
            };
            if let Err(err) = self.store.insert_notification(row).await {
                warn!(owner = %owner_id, error = %err, "notification insert failed");
            }
        }
    }
}

fn user_message(sync_error: &SyncError) -> String {
    match sync_error.kind() {
        ErrorKind::RateLimit => {
            "API request limit reached. The sync will be retried shortly.".into()
        }
        ErrorKind::Auth => "Authorization failed. Check the API keys for your account.".into(),
        ErrorKind::Network => "Network problems during sync. It will be retried.".into(),
        ErrorKind::Validation => "Some items contained invalid data during sync.".into(),
        ErrorKind::ProviderBlocked => {
            "The marketplace is temporarily limiting automated access. Please try again later."
                .into()
        }
        ErrorKind::Unknown => format!("Sync failed: {sync_error}"),
    }
}
