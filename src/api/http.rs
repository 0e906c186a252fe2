// SPDX-License-Identifier: GPL-3.0-only
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::handlers::{
    ApiHandlers, ApiResponse, ApiResult, RemoveQuery, SetSettingRequest, TriggerQuery,
};
use crate::auto_update::{AutoUpdateSettings, FeedbackReport, PendingUpdates, UpdateRegistry};
use crate::installer::InstalledPackage;

pub struct HttpServer {
    handlers: Arc<ApiHandlers>,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(handlers: ApiHandlers, addr: SocketAddr) -> Self {
        Self {
            handlers: Arc::new(handlers),
            addr,
        }
    }

    pub fn router(handlers: Arc<ApiHandlers>) -> Router {
        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/packages", get(list_packages_handler))
            .route("/api/packages/:id/remove", post(remove_package_handler))
            .route(
                "/api/auto-updates/settings",
                get(get_settings_handler).post(set_setting_handler),
            )
            .route("/api/auto-updates/pending", get(pending_handler))
            .route("/api/auto-updates/registry", get(registry_handler))
            .route("/api/auto-updates/feedback", get(feedback_handler))
            .route("/api/auto-updates/trigger", post(trigger_handler))
            .with_state(handlers)
    }

    /// Serve until `shutdown` fires
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = Self::router(self.handlers);

        info!(addr = %self.addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

async fn health_handler() -> Json<ApiResponse<&'static str>> {
    ApiHandlers::health().await
}

async fn list_packages_handler(State(handlers): State<Arc<ApiHandlers>>) -> ApiResult<Vec<InstalledPackage>> {
    handlers.list_packages().await
}

async fn remove_package_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    path: Path<String>,
    query: Query<RemoveQuery>,
) -> ApiResult<()> {
    handlers.remove_package(path, query).await
}

async fn get_settings_handler(State(handlers): State<Arc<ApiHandlers>>) -> ApiResult<AutoUpdateSettings> {
    handlers.get_settings().await
}

async fn set_setting_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    request: Json<SetSettingRequest>,
) -> ApiResult<AutoUpdateSettings> {
    handlers.set_setting(request).await
}

async fn pending_handler(State(handlers): State<Arc<ApiHandlers>>) -> ApiResult<PendingUpdates> {
    handlers.pending().await
}

async fn registry_handler(State(handlers): State<Arc<ApiHandlers>>) -> ApiResult<UpdateRegistry> {
    handlers.registry().await
}

async fn feedback_handler(State(handlers): State<Arc<ApiHandlers>>) -> ApiResult<FeedbackReport> {
    handlers.feedback().await
}

async fn trigger_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    query: Query<TriggerQuery>,
) -> ApiResult<&'static str> {
    handlers.trigger(query).await
}
