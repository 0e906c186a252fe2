// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub id: String,
    pub version: String,

    /// Part of the bundled system package set
    #[serde(default)]
    pub is_core: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Unattended install started by the auto-updater
    pub auto_update: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub delete_volumes: bool,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to run installer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("installing {id} failed ({status}): {message}")]
    Failed {
        id: String,
        status: String,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum RemoveError {
    #[error("package {0} is not installed")]
    NotInstalled(String),

    #[error("failed to run installer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("removing {id} failed ({status}): {message}")]
    Failed {
        id: String,
        status: String,
        message: String,
    },
}

#[async_trait]
pub trait Installer: Send + Sync {
    /// Packages currently installed on this host
    async fn list_installed(&self) -> anyhow::Result<Vec<InstalledPackage>>;

    /// Install `id`, at `version` when given or the latest release otherwise
    async fn install(&self, id: &str, version: Option<&str>, options: InstallOptions) -> Result<(), InstallError>;

    async fn remove(&self, id: &str, options: RemoveOptions) -> Result<(), RemoveError>;
}
