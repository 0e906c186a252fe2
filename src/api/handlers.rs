// SPDX-License-Identifier: GPL-3.0-only
use axum::Json;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auto_update::{
    AutoUpdateHandle, AutoUpdateSettings, AutoUpdater, FeedbackReport, PendingUpdates, UpdateRegistry,
};
use crate::events::{EventBus, PackageEvent};
use crate::installer::{InstalledPackage, Installer, RemoveError, RemoveOptions};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RemoveQuery {
    #[serde(default)]
    pub delete_volumes: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetSettingRequest {
    pub id: String,
    pub enabled: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TriggerQuery {
    /// Wait for the pass to finish before responding
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<T>>)>;

fn failure<T>(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiResponse<T>>) {
    (status, Json(ApiResponse::error(message.into())))
}

pub struct ApiHandlers {
    updater: AutoUpdater,
    auto_updates: Arc<AutoUpdateHandle>,
    installer: Arc<dyn Installer>,
    events: EventBus,
}

impl ApiHandlers {
    pub fn new(
        updater: AutoUpdater,
        auto_updates: Arc<AutoUpdateHandle>,
        installer: Arc<dyn Installer>,
        events: EventBus,
    ) -> Self {
        Self {
            updater,
            auto_updates,
            installer,
            events,
        }
    }
}

impl ApiHandlers {
    pub async fn health() -> Json<ApiResponse<&'static str>> {
        Json(ApiResponse::success("ok"))
    }

    pub async fn list_packages(&self) -> ApiResult<Vec<InstalledPackage>> {
        match self.installer.list_installed().await {
            Ok(packages) => Ok(Json(ApiResponse::success(packages))),
            Err(e) => {
                error!(error = %e, "Failed to list packages");
                Err(failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list packages"))
            }
        }
    }

    pub async fn remove_package(&self, Path(id): Path<String>, Query(query): Query<RemoveQuery>) -> ApiResult<()> {
        let options = RemoveOptions {
            delete_volumes: query.delete_volumes,
        };

        match self.installer.remove(&id, options).await {
            Ok(()) => {
                info!(package = %id, "Package removed");
                self.events.publish(PackageEvent::PackagesModified {
                    ids: vec![id],
                    removed: true,
                });
                Ok(Json(ApiResponse::success(())))
            }
            Err(RemoveError::NotInstalled(id)) => {
                Err(failure(StatusCode::NOT_FOUND, format!("Package {} is not installed", id)))
            }
            Err(e) => {
                error!(package = %id, error = %e, "Failed to remove package");
                Err(failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
            }
        }
    }

    pub async fn get_settings(&self) -> ApiResult<AutoUpdateSettings> {
        Ok(Json(ApiResponse::success(self.updater.state().settings())))
    }

    pub async fn set_setting(&self, Json(request): Json<SetSettingRequest>) -> ApiResult<AutoUpdateSettings> {
        let id = request.id.trim();
        if id.is_empty() {
            warn!("Rejected auto-update setting without id");
            return Err(failure(StatusCode::BAD_REQUEST, "Setting id must not be empty"));
        }

        let state = self.updater.state();
        state.set_setting(id, request.enabled);
        Ok(Json(ApiResponse::success(state.settings())))
    }

    pub async fn pending(&self) -> ApiResult<PendingUpdates> {
        Ok(Json(ApiResponse::success(self.updater.state().pending())))
    }

    pub async fn registry(&self) -> ApiResult<UpdateRegistry> {
        Ok(Json(ApiResponse::success(self.updater.state().registry())))
    }

    pub async fn feedback(&self) -> ApiResult<FeedbackReport> {
        match self.updater.feedback().await {
            Ok(report) => Ok(Json(ApiResponse::success(report))),
            Err(e) => {
                error!(error = %e, "Failed to compute auto-update feedback");
                Err(failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to compute feedback"))
            }
        }
    }

    pub async fn trigger(&self, Query(query): Query<TriggerQuery>) -> ApiResult<&'static str> {
        if query.wait {
            self.auto_updates.run_now().await;
            Ok(Json(ApiResponse::success("completed")))
        } else {
            self.auto_updates.trigger();
            Ok(Json(ApiResponse::success("triggered")))
        }
    }
}
