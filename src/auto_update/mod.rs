// SPDX-License-Identifier: GPL-3.0-only
pub mod clock;
pub mod models;
pub mod orchestrator;
mod packages;
pub mod state;
mod system;
pub mod version;
pub mod version_id;


pub use clock::{Clock, SystemClock};
pub use models::{
    AutoUpdateSetting, AutoUpdateSettings, CORE_PACKAGE_ID, Feedback, MY_PACKAGES, PendingEntry, PendingUpdates,
    RegistryEntry, SYSTEM_PACKAGES, UpdateRegistry,
};
pub use orchestrator::{AutoUpdateHandle, AutoUpdater, FeedbackReport, TriggerReason};
pub use state::{StatePersister, UpdateStateStore};
