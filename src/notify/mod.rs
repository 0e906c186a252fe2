// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of an unattended update, surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    AutoUpdated { id: String, version: String },
    AutoUpdateFailed { id: String, version: String, error: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Writes notifications to the daemon log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        match notification {
            Notification::AutoUpdated { id, version } => {
                info!(package = %id, version = %version, "Package auto-updated")
            }
            Notification::AutoUpdateFailed { id, version, error } => {
                warn!(package = %id, version = %version, error = %error, "Package auto-update failed")
            }
        }
    }
}
