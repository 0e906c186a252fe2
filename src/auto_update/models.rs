// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Group key standing for every user-installed package
pub const MY_PACKAGES: &str = "my-packages";

/// Group key standing for the bundled system package set
pub const SYSTEM_PACKAGES: &str = "system-packages";

/// Identifier under which the system package set is tracked in pending/registry state
pub const CORE_PACKAGE_ID: &str = "core.fleet";

/// Domain suffix shared by every package identifier
pub const PACKAGE_DOMAIN: &str = ".fleet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutoUpdateSetting {
    pub enabled: bool,
}

/// Keyed by package id or one of the group keys
pub type AutoUpdateSettings = BTreeMap<String, AutoUpdateSetting>;

/// The single in-progress delay/retry slot of one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Candidate version the delay clock is running for
    pub version: String,

    /// When this candidate was first observed
    pub first_seen: DateTime<Utc>,

    /// Earliest time the candidate may be installed unattended
    pub scheduled_update: DateTime<Utc>,

    pub completed_delay: bool,

    /// Last install failure, kept until the update succeeds or is cleared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub type PendingUpdates = BTreeMap<String, PendingEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub updated: DateTime<Utc>,
    pub successful: bool,
}

/// Completed unattended updates, keyed by id then version
pub type UpdateRegistry = BTreeMap<String, BTreeMap<String, RegistryEntry>>;

/// Status of a package's auto-update, derived from pending and registry state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Feedback {
    /// The installed version was put in place by an unattended update
    Updated { at: DateTime<Utc> },

    /// The installed version matches the awaited candidate, but no unattended install happened
    ManuallyUpdated,

    /// Delay elapsed; install will be attempted (again) on the next pass
    InQueue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },

    /// Waiting for the delay to elapse
    Scheduled { at: DateTime<Utc> },

    None,
}

/// Whether `id` is one of the two reserved group keys
pub fn is_group_key(id: &str) -> bool {
    id == MY_PACKAGES || id == SYSTEM_PACKAGES
}
