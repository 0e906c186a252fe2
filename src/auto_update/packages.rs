// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use tracing::{debug, info, warn};

use crate::auto_update::models::{CORE_PACKAGE_ID, PACKAGE_DOMAIN, is_group_key};
use crate::auto_update::orchestrator::AutoUpdater;
use crate::auto_update::version::{UpdateType, classify_update, is_newer, parse_version};
use crate::events::PackageEvent;
use crate::installer::{InstallOptions, InstalledPackage};
use crate::notify::Notification;

fn is_user_package(package: &InstalledPackage) -> bool {
    !package.is_core
        && package.id != CORE_PACKAGE_ID
        && !is_group_key(&package.id)
        && package.id.len() > PACKAGE_DOMAIN.len()
        && package.id.ends_with(PACKAGE_DOMAIN)
}

/// Bring every user package with auto-updates enabled up to its latest minor/patch release.
///
/// Failures are contained per package so one broken package never blocks the others.
pub(crate) async fn update_packages(updater: &AutoUpdater) -> anyhow::Result<()> {
    let installed = updater
        .installer
        .list_installed()
        .await
        .context("Failed to list installed packages")?;

    let mut updated = Vec::new();
    for package in installed.iter().filter(|p| is_user_package(p)) {
        match update_package(updater, package).await {
            Ok(true) => updated.push(package.id.clone()),
            Ok(false) => {}
            Err(e) => warn!(package = %package.id, error = %format!("{:#}", e), "Package auto-update failed"),
        }
    }

    if !updated.is_empty() {
        info!(count = updated.len(), packages = ?updated, "Auto-updated packages");
        updater.events.publish(PackageEvent::PackagesChanged);
    }
    Ok(())
}

/// Returns whether the package was updated
async fn update_package(updater: &AutoUpdater, package: &InstalledPackage) -> anyhow::Result<bool> {
    let id = package.id.as_str();

    if parse_version(&package.version).is_none() {
        debug!(package = %id, version = %package.version, "Installed version is not semver, skipping");
        return Ok(false);
    }

    if !updater.releases.repo_exists(id).await? {
        debug!(package = %id, "No upstream repository, skipping");
        return Ok(false);
    }

    let latest = updater.releases.fetch_latest_version(id).await?.version;
    if !is_newer(&package.version, &latest) {
        return Ok(false);
    }

    let Some(update_type) = classify_update(&package.version, &latest) else {
        return Ok(false);
    };

    if !updater.state.is_auto_update_enabled(id) {
        debug!(package = %id, version = %latest, "Auto-updates disabled, skipping");
        return Ok(false);
    }

    if update_type == UpdateType::Major {
        info!(package = %id, from = %package.version, to = %latest, "Major update requires a manual install");
        return Ok(false);
    }

    if !updater.state.is_update_delay_completed(id, &latest, updater.clock.now()) {
        return Ok(false);
    }

    info!(package = %id, from = %package.version, to = %latest, ?update_type, "Installing auto-update");
    let options = InstallOptions { auto_update: true };
    match updater.installer.install(id, Some(&latest), options).await {
        Ok(()) => {
            updater.state.flag_completed_update(id, &latest, updater.clock.now());
            updater
                .notifier
                .notify(Notification::AutoUpdated {
                    id: id.to_string(),
                    version: latest,
                })
                .await;
            Ok(true)
        }
        Err(e) => {
            updater.state.flag_error_update(id, &e.to_string());
            updater
                .notifier
                .notify(Notification::AutoUpdateFailed {
                    id: id.to_string(),
                    version: latest.clone(),
                    error: e.to_string(),
                })
                .await;
            Err(anyhow::Error::new(e).context(format!("Installing {} {} failed", id, latest)))
        }
    }
}
