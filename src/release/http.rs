// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::auto_update::version_id::PackageVersion;
use crate::release::system_set::core_update_from;
use crate::scheduler::sleep;
use crate::release::traits::{CoreUpdateData, LatestRelease, ReleaseError, ReleaseSource};

/// Backoff doubles at most this many times
const MAX_BACKOFF_EXPONENT: u32 = 6;

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(2_u32.pow(exponent))
}

#[derive(Deserialize)]
struct CoreRelease {
    packages: Vec<PackageVersion>,
}

/// Release metadata served by the package registry over HTTP.
///
/// Transport failures and 5xx responses are retried with exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpReleaseSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_base_delay: Duration,
    cancel: CancellationToken,
}

impl HttpReleaseSource {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        let parsed = Url::parse(base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Release API URL must use http or https, got {}", parsed.scheme());
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("fleetd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_base_delay = base_delay;
        self
    }

    /// Stop waiting between retries once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<Response, ReleaseError> {
        let url = self.url(path);
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            let mut request = self.client.get(&url);
            if let Some(ref key) = self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_server_error() => ReleaseError::Status {
                    url: url.clone(),
                    status: response.status().as_u16(),
                },
                Ok(response) => {
                    if attempt > 1 {
                        info!(url = %url, attempt, "Release request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(source) => ReleaseError::Request {
                    url: url.clone(),
                    source,
                },
            };

            warn!(url = %url, attempt, error = %error, "Release request attempt failed");
            last_error = Some(error);
            if attempt < self.max_retries
                && sleep(backoff_delay(self.retry_base_delay, attempt), &self.cancel).await.is_err()
            {
                debug!(url = %url, "Release request retries aborted");
                break;
            }
        }

        Err(last_error.unwrap_or_else(|| ReleaseError::Unavailable(url)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, id: &str) -> Result<T, ReleaseError> {
        let response = self.get(path).await?;
        let url = response.url().to_string();

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(ReleaseError::NotFound(id.to_string())),
            status => {
                return Err(ReleaseError::Status {
                    url,
                    status: status.as_u16(),
                });
            }
        }

        response.json().await.map_err(|e| ReleaseError::InvalidResponse {
            url,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn ensure_available(&self) -> Result<(), ReleaseError> {
        let response = self.get("health").await.map_err(|e| ReleaseError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ReleaseError::Unavailable(format!("health check returned {}", response.status())));
        }
        Ok(())
    }

    async fn repo_exists(&self, id: &str) -> Result<bool, ReleaseError> {
        let response = self.get(&format!("packages/{}", id)).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ReleaseError::Status {
                url: response.url().to_string(),
                status: status.as_u16(),
            }),
        }
    }

    async fn fetch_latest_version(&self, id: &str) -> Result<LatestRelease, ReleaseError> {
        let release: LatestRelease = self.get_json(&format!("packages/{}/latest", id), id).await?;
        debug!(package = %id, version = %release.version, "Fetched latest release");
        Ok(release)
    }

    async fn fetch_core_update_data(&self, installed_core: &[PackageVersion]) -> Result<CoreUpdateData, ReleaseError> {
        let release: CoreRelease = self.get_json("core/latest", "core").await?;
        let data = core_update_from(installed_core, &release.packages);
        debug!(?data, "Fetched system package set release");
        Ok(data)
    }
}
