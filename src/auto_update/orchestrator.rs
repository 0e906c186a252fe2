// SPDX-License-Identifier: GPL-3.0-only
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::auto_update::clock::Clock;
use crate::auto_update::models::Feedback;
use crate::auto_update::state::UpdateStateStore;
use crate::auto_update::version_id::PackageVersion;
use crate::auto_update::{packages, system};
use crate::events::{EventBus, PackageEvent};
use crate::installer::Installer;
use crate::notify::Notifier;
use crate::release::ReleaseSource;
use crate::scheduler::{Coalescer, IntervalSchedule, run_at_intervals};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Interval,
    Manual,
}

/// Auto-update status of every installed package and of the system package set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackReport {
    pub packages: BTreeMap<String, Feedback>,
    pub system: Feedback,
}

/// Runs the package and system update routines against shared collaborators
#[derive(Clone)]
pub struct AutoUpdater {
    pub(crate) state: Arc<UpdateStateStore>,
    pub(crate) installer: Arc<dyn Installer>,
    pub(crate) releases: Arc<dyn ReleaseSource>,
    pub(crate) events: EventBus,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl AutoUpdater {
    pub fn new(
        state: Arc<UpdateStateStore>,
        installer: Arc<dyn Installer>,
        releases: Arc<dyn ReleaseSource>,
        events: EventBus,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            installer,
            releases,
            events,
            notifier,
            clock,
        }
    }

    pub fn state(&self) -> &Arc<UpdateStateStore> {
        &self.state
    }

    /// One reconciliation pass: the package routine, then the system routine.
    ///
    /// Never fails. Each routine's errors and panics are logged, and a failure
    /// in the package routine does not skip the system routine.
    pub async fn run_pass(&self, reason: TriggerReason) {
        let span = info_span!("auto_update_pass", run_id = %Uuid::new_v4(), ?reason);
        self.run_routines().instrument(span).await;
    }

    async fn run_routines(&self) {
        info!("Starting auto-update pass");

        if let Err(e) = self.releases.ensure_available().await {
            warn!(error = %e, "Release service unreachable, skipping auto-update pass");
            return;
        }

        if let Err(e) = contain(packages::update_packages(self)).await {
            error!(error = %format!("{:#}", e), "Package auto-update routine failed");
        }

        // Runs after the package routine; a system update may restart the daemon
        if let Err(e) = contain(system::update_system(self)).await {
            error!(error = %format!("{:#}", e), "System auto-update routine failed");
        }

        info!("Auto-update pass finished");
    }

    /// Drop pending and registry state of packages that were removed
    pub fn handle_package_event(&self, event: &PackageEvent) {
        if let PackageEvent::PackagesModified { ids, removed: true } = event {
            for id in ids {
                self.state.clear_pending_updates(id);
                self.state.clear_registry(id);
                debug!(package = %id, "Cleared auto-update state of removed package");
            }
        }
    }

    /// Feedback for every installed package and for the system package set
    pub async fn feedback(&self) -> anyhow::Result<FeedbackReport> {
        let installed = self.installer.list_installed().await?;
        let now = self.clock.now();

        let core: Vec<_> = installed
            .iter()
            .filter(|p| p.is_core)
            .map(|p| PackageVersion::new(p.id.clone(), p.version.clone()))
            .collect();

        let packages = installed
            .iter()
            .filter(|p| !p.is_core)
            .map(|p| (p.id.clone(), self.state.feedback(&p.id, &p.version, now)))
            .collect();

        Ok(FeedbackReport {
            packages,
            system: self.state.core_feedback(&core, now),
        })
    }

    /// Start the periodic pass loop and the removal listener.
    ///
    /// Interval ticks and manual triggers share one single-flight pass, so at
    /// most one pass runs at a time.
    pub fn start(&self, intervals: Vec<Duration>, cancel: CancellationToken) -> AutoUpdateHandle {
        let updater = self.clone();
        let passes = Coalescer::new("auto_update", move |reason: TriggerReason| {
            let updater = updater.clone();
            async move {
                updater.run_pass(reason).await;
                Ok(())
            }
            .boxed()
        });

        let ticker = passes.clone();
        let loop_cancel = cancel.clone();
        let interval_task = tokio::spawn(async move {
            run_at_intervals(
                "auto_update",
                || {
                    let ticker = ticker.clone();
                    async move {
                        ticker.run(TriggerReason::Interval).await;
                        Ok(())
                    }
                },
                IntervalSchedule::new(intervals),
                loop_cancel,
            )
            .await;
        });

        let updater = self.clone();
        let listener_task = self.events.spawn_handler("auto_update_cleanup", cancel.clone(), move |event| {
            updater.handle_package_event(&event);
            async { Ok(()) }
        });

        info!("Auto-updater started");
        AutoUpdateHandle {
            passes,
            cancel,
            tasks: Mutex::new(vec![interval_task, listener_task]),
        }
    }
}

async fn contain<F>(routine: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    AssertUnwindSafe(routine)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(anyhow::anyhow!("routine panicked")))
}

/// Control surface of a running auto-updater
pub struct AutoUpdateHandle {
    passes: Coalescer<TriggerReason>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AutoUpdateHandle {
    /// Request an out-of-schedule pass without waiting for it.
    ///
    /// Ignored once the updater is shutting down.
    pub fn trigger(&self) {
        if self.is_stopping() {
            return;
        }
        self.passes.trigger(TriggerReason::Manual);
    }

    /// Request an out-of-schedule pass and wait until a pass covering the request has finished.
    ///
    /// Returns immediately once the updater is shutting down.
    pub async fn run_now(&self) {
        if self.is_stopping() {
            return;
        }
        self.passes.run(TriggerReason::Manual).await;
    }

    fn is_stopping(&self) -> bool {
        let stopping = self.cancel.is_cancelled();
        if stopping {
            debug!("Auto-updater is stopping, ignoring manual trigger");
        }
        stopping
    }

    /// Stop the loops and let an in-flight pass finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Auto-update task failed");
            }
        }

        self.passes.wait_idle().await;
        info!("Auto-updater stopped");
    }
}
