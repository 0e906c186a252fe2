// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use tracing::{debug, info};

use crate::auto_update::models::CORE_PACKAGE_ID;
use crate::auto_update::orchestrator::AutoUpdater;
use crate::auto_update::version::UpdateType;
use crate::auto_update::version_id::PackageVersion;
use crate::events::PackageEvent;
use crate::installer::InstallOptions;
use crate::notify::Notification;
use crate::release::CoreUpdateData;

/// Installed packages that belong to the system package set
pub(crate) async fn installed_core(updater: &AutoUpdater) -> anyhow::Result<Vec<PackageVersion>> {
    let installed = updater
        .installer
        .list_installed()
        .await
        .context("Failed to list installed packages")?;

    Ok(installed
        .into_iter()
        .filter(|p| p.is_core)
        .map(|p| PackageVersion::new(p.id, p.version))
        .collect())
}

/// Install a published system package set once it has soaked, for patch releases only.
///
/// Minor and major system updates are left for the user and never queued.
pub(crate) async fn update_system(updater: &AutoUpdater) -> anyhow::Result<()> {
    let core = installed_core(updater).await?;
    let data = updater
        .releases
        .fetch_core_update_data(&core)
        .await
        .context("Failed to fetch system package set release")?;

    let (classification, version_id) = match data {
        CoreUpdateData::Unavailable => {
            debug!("System packages are up to date");
            return Ok(());
        }
        CoreUpdateData::Available {
            classification,
            version_id,
        } => (classification, version_id),
    };

    if classification != UpdateType::Patch {
        info!(?classification, version_id = %version_id, "System update requires a manual install");
        return Ok(());
    }

    if !updater.state.is_auto_update_enabled(CORE_PACKAGE_ID) {
        debug!(version_id = %version_id, "System auto-updates disabled, skipping");
        return Ok(());
    }

    if !updater.state.is_update_delay_completed(CORE_PACKAGE_ID, &version_id, updater.clock.now()) {
        return Ok(());
    }

    // The install takes whatever set is published now, so it must still be the soaked one
    let current = updater
        .releases
        .fetch_core_update_data(&core)
        .await
        .context("Failed to re-check system package set release")?;
    let unchanged = matches!(
        &current,
        CoreUpdateData::Available { version_id: latest, .. } if *latest == version_id
    );
    if !unchanged {
        info!(version_id = %version_id, "Published system package set changed, deferring install");
        return Ok(());
    }

    info!(version_id = %version_id, "Installing system auto-update");
    let options = InstallOptions { auto_update: true };
    match updater.installer.install(CORE_PACKAGE_ID, None, options).await {
        Ok(()) => {
            updater.state.flag_completed_update(CORE_PACKAGE_ID, &version_id, updater.clock.now());
            updater.events.publish(PackageEvent::PackagesChanged);
            updater
                .notifier
                .notify(Notification::AutoUpdated {
                    id: CORE_PACKAGE_ID.to_string(),
                    version: version_id,
                })
                .await;
            Ok(())
        }
        Err(e) => {
            updater.state.flag_error_update(CORE_PACKAGE_ID, &e.to_string());
            updater
                .notifier
                .notify(Notification::AutoUpdateFailed {
                    id: CORE_PACKAGE_ID.to_string(),
                    version: version_id,
                    error: e.to_string(),
                })
                .await;
            Err(anyhow::Error::new(e).context("Installing system update failed"))
        }
    }
}
