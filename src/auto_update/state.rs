// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auto_update::models::{
    AutoUpdateSetting, AutoUpdateSettings, CORE_PACKAGE_ID, Feedback, MY_PACKAGES, PendingEntry,
    PendingUpdates, RegistryEntry, SYSTEM_PACKAGES, UpdateRegistry,
};
use crate::auto_update::version_id::{PackageVersion, is_version_id_satisfied};
use crate::store::KvStore;

const SETTINGS_KEY: &str = "auto-update-settings";
const PENDING_KEY: &str = "auto-update-pending";
const REGISTRY_KEY: &str = "auto-update-registry";

/// Default soak period before an unattended update may be installed
pub const DEFAULT_UPDATE_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct StateWrite {
    key: &'static str,
    value: Value,
}

#[derive(Default)]
struct Inner {
    settings: AutoUpdateSettings,
    pending: PendingUpdates,
    registry: UpdateRegistry,
    writer: Option<mpsc::UnboundedSender<StateWrite>>,
}

impl Inner {
    fn persist<T: Serialize>(&self, key: &'static str, value: &T) {
        let Some(writer) = &self.writer else {
            return;
        };
        match serde_json::to_value(value) {
            Ok(value) => {
                if writer.send(StateWrite { key, value }).is_err() {
                    warn!(key, "State persister has stopped, change will not be saved");
                }
            }
            Err(e) => error!(key, error = %e, "Failed to serialize auto-update state"),
        }
    }

    fn persist_settings(&self) {
        self.persist(SETTINGS_KEY, &self.settings);
    }

    fn persist_pending(&self) {
        self.persist(PENDING_KEY, &self.pending);
    }

    fn persist_registry(&self) {
        self.persist(REGISTRY_KEY, &self.registry);
    }

    fn clear_pending(&mut self, id: &str) {
        let before = self.pending.len();
        match id {
            MY_PACKAGES => self.pending.retain(|key, _| key == CORE_PACKAGE_ID),
            SYSTEM_PACKAGES => {
                self.pending.remove(CORE_PACKAGE_ID);
            }
            _ => {
                self.pending.remove(id);
            }
        }

        if self.pending.len() != before {
            debug!(id, cleared = before - self.pending.len(), "Cleared pending updates");
            self.persist_pending();
        }
    }
}

/// Background task that writes state changes to the key-value store in order
pub struct StatePersister {
    handle: JoinHandle<()>,
}

/// Owner of the auto-update settings, pending delay slots and completed-update registry.
///
/// Every operation is synchronous and finishes its read-modify-write under one
/// lock without yielding, so concurrent reconciliation passes cannot interleave
/// inside an operation. Changes are written behind to the key-value store, in
/// the order they were made.
pub struct UpdateStateStore {
    inner: Mutex<Inner>,
    delay: chrono::Duration,
}

impl UpdateStateStore {
    /// Create a store that keeps its state in memory only
    #[cfg(test)]
    pub fn in_memory(delay: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            delay: to_chrono(delay),
        }
    }

    /// Load persisted state from `kv` and start writing changes back to it
    pub async fn open(kv: Arc<dyn KvStore>, delay: Duration) -> anyhow::Result<(Self, StatePersister)> {
        let settings: AutoUpdateSettings = load_value(kv.as_ref(), SETTINGS_KEY).await?;
        let pending: PendingUpdates = load_value(kv.as_ref(), PENDING_KEY).await?;
        let registry: UpdateRegistry = load_value(kv.as_ref(), REGISTRY_KEY).await?;

        info!(
            settings = settings.len(),
            pending = pending.len(),
            registry = registry.len(),
            "Loaded auto-update state"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<StateWrite>();
        let handle = tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                if let Err(e) = kv.set(write.key, write.value).await {
                    error!(key = write.key, error = %e, "Failed to persist auto-update state");
                }
            }
            debug!("State persister drained");
        });

        let store = Self {
            inner: Mutex::new(Inner {
                settings,
                pending,
                registry,
                writer: Some(tx),
            }),
            delay: to_chrono(delay),
        };

        Ok((store, StatePersister { handle }))
    }

    /// Stop accepting writes and wait until every queued write has been persisted.
    ///
    /// Later mutations still apply in memory but are no longer saved.
    pub async fn close(&self, persister: StatePersister) {
        let writer = self.lock().writer.take();
        drop(writer);

        if let Err(e) = persister.handle.await {
            error!(error = %e, "State persister task failed");
        }
        info!("Auto-update state flushed");
    }

    pub fn settings(&self) -> AutoUpdateSettings {
        self.lock().settings.clone()
    }

    /// Enable or disable auto-updates for a package or group key.
    ///
    /// Disabling drops the pending updates the identifier covers.
    pub fn set_setting(&self, id: &str, enabled: bool) {
        let mut inner = self.lock();
        inner.settings.insert(id.to_string(), AutoUpdateSetting { enabled });
        inner.persist_settings();

        if !enabled {
            inner.clear_pending(id);
        }
        info!(id, enabled, "Auto-update setting changed");
    }

    /// Whether unattended updates are allowed for `id`.
    ///
    /// The system package set follows the system group. A concrete package uses
    /// its own setting when it has one, otherwise the user packages group.
    pub fn is_auto_update_enabled(&self, id: &str) -> bool {
        let inner = self.lock();
        let setting = if id == CORE_PACKAGE_ID || id == SYSTEM_PACKAGES {
            inner.settings.get(SYSTEM_PACKAGES)
        } else {
            inner
                .settings
                .get(id)
                .or_else(|| inner.settings.get(MY_PACKAGES))
        };
        setting.map(|s| s.enabled).unwrap_or(false)
    }

    pub fn pending(&self) -> PendingUpdates {
        self.lock().pending.clone()
    }

    pub fn registry(&self) -> UpdateRegistry {
        self.lock().registry.clone()
    }

    /// Single-slot delayed admission check for `candidate` of `id`.
    ///
    /// A new or changed candidate (re)starts the delay clock and returns false.
    /// Repeated checks for the same candidate keep the clock running and return
    /// true once `now` is past the scheduled time.
    pub fn is_update_delay_completed(&self, id: &str, candidate: &str, now: DateTime<Utc>) -> bool {
        let mut inner = self.lock();

        let tracked = inner.pending.get(id).map(|entry| entry.version == candidate).unwrap_or(false);
        if !tracked {
            let scheduled_update = now.checked_add_signed(self.delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
            inner.pending.insert(
                id.to_string(),
                PendingEntry {
                    version: candidate.to_string(),
                    first_seen: now,
                    scheduled_update,
                    completed_delay: false,
                    error_message: None,
                },
            );
            inner.persist_pending();
            info!(id, version = candidate, scheduled = %scheduled_update, "Scheduled auto-update");
            return false;
        }

        let mut newly_completed = false;
        let completed = match inner.pending.get_mut(id) {
            Some(entry) if now > entry.scheduled_update => {
                if !entry.completed_delay {
                    entry.completed_delay = true;
                    newly_completed = true;
                }
                true
            }
            _ => false,
        };

        if newly_completed {
            inner.persist_pending();
            debug!(id, version = candidate, "Auto-update delay completed");
        }
        completed
    }

    /// Record a successful unattended update and free the pending slot
    pub fn flag_completed_update(&self, id: &str, version: &str, timestamp: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.registry.entry(id.to_string()).or_default().insert(
            version.to_string(),
            RegistryEntry {
                updated: timestamp,
                successful: true,
            },
        );
        inner.persist_registry();

        if inner.pending.remove(id).is_some() {
            inner.persist_pending();
        }
        info!(id, version, "Recorded completed auto-update");
    }

    /// Attach an install failure to the pending slot of `id`.
    ///
    /// The schedule is left untouched, so the next pass retries right away.
    pub fn flag_error_update(&self, id: &str, message: &str) {
        let mut inner = self.lock();
        match inner.pending.get_mut(id) {
            Some(entry) => {
                entry.error_message = Some(message.to_string());
                inner.persist_pending();
            }
            None => warn!(id, "No pending update to attach error to"),
        }
    }

    /// Delete pending updates for a package, or for every package a group key covers
    pub fn clear_pending_updates(&self, id: &str) {
        self.lock().clear_pending(id);
    }

    /// Forget every completed update of `id`
    pub fn clear_registry(&self, id: &str) {
        let mut inner = self.lock();
        if inner.registry.remove(id).is_some() {
            inner.persist_registry();
            debug!(id, "Cleared auto-update registry");
        }
    }

    /// Auto-update status of a package given the version currently installed
    pub fn feedback(&self, id: &str, installed_version: &str, now: DateTime<Utc>) -> Feedback {
        let inner = self.lock();

        if let Some(entry) = inner.registry.get(id).and_then(|versions| versions.get(installed_version)) {
            return Feedback::Updated { at: entry.updated };
        }

        match inner.pending.get(id) {
            Some(pending) if pending.version == installed_version => Feedback::ManuallyUpdated,
            Some(pending) => pending_feedback(pending, now),
            None => Feedback::None,
        }
    }

    /// Auto-update status of the system package set given the installed core packages
    pub fn core_feedback(&self, installed_core: &[PackageVersion], now: DateTime<Utc>) -> Feedback {
        let inner = self.lock();

        let last_update = inner
            .registry
            .get(CORE_PACKAGE_ID)
            .into_iter()
            .flatten()
            .filter(|(version_id, entry)| {
                entry.successful && is_version_id_satisfied(version_id, installed_core)
            })
            .map(|(_, entry)| entry.updated)
            .max();
        if let Some(at) = last_update {
            return Feedback::Updated { at };
        }

        match inner.pending.get(CORE_PACKAGE_ID) {
            Some(pending) if is_version_id_satisfied(&pending.version, installed_core) => {
                Feedback::ManuallyUpdated
            }
            Some(pending) => pending_feedback(pending, now),
            None => Feedback::None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn pending_feedback(pending: &PendingEntry, now: DateTime<Utc>) -> Feedback {
    if now > pending.scheduled_update {
        Feedback::InQueue {
            error_message: pending.error_message.clone(),
        }
    } else {
        Feedback::Scheduled {
            at: pending.scheduled_update,
        }
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

async fn load_value<T: DeserializeOwned + Default>(kv: &dyn KvStore, key: &str) -> anyhow::Result<T> {
    match kv.get(key).await? {
        Some(value) => match serde_json::from_value(value) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!(key, error = %e, "Discarding malformed auto-update state");
                Ok(T::default())
            }
        },
        None => Ok(T::default()),
    }
}
