// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auto_update::version::UpdateType;
use crate::auto_update::version_id::PackageVersion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestRelease {
    pub version: String,
}

/// Whether a newer system package set is published, and how far it moves
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CoreUpdateData {
    Unavailable,

    Available {
        classification: UpdateType,
        /// Composite version id of the published set
        version_id: String,
    },
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("release service unavailable: {0}")]
    Unavailable(String),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("no release published for {0}")]
    NotFound(String),

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fails when the release service cannot be reached at all
    async fn ensure_available(&self) -> Result<(), ReleaseError>;

    /// Whether an upstream repository is published for `id`
    async fn repo_exists(&self, id: &str) -> Result<bool, ReleaseError>;

    async fn fetch_latest_version(&self, id: &str) -> Result<LatestRelease, ReleaseError>;

    /// Compare the published system package set with the installed one
    async fn fetch_core_update_data(&self, installed_core: &[PackageVersion]) -> Result<CoreUpdateData, ReleaseError>;
}
