// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::auto_update::state::DEFAULT_UPDATE_DELAY;
use crate::auto_update::version_id::PackageVersion;
use crate::auto_update::{AutoUpdater, Clock, UpdateStateStore};
use crate::config::{Config, LogFormat};
use crate::events::EventBus;
use crate::installer::{InstallError, InstallOptions, InstalledPackage, Installer, RemoveError, RemoveOptions};
use crate::notify::{Notification, Notifier};
use crate::release::{CoreUpdateData, LatestRelease, ReleaseError, ReleaseSource};

/// Create a test configuration with temporary paths
pub fn create_test_config() -> Config {
    let temp_dir = std::env::temp_dir().join(format!("fleetd-test-{}", uuid::Uuid::new_v4()));

    Config {
        state_db_path: temp_dir.join("state.db"),
        release_api_url: "http://localhost:3000/api".to_string(),
        release_api_key: None,
        installer_command: "fleet-installer".to_string(),
        local_api_bind: SocketAddr::from_str("127.0.0.1:0").unwrap(),
        auto_update_delay_secs: 86_400,
        auto_update_intervals_secs: vec![120, 600, 1800],
        log_level: "error".to_string(),
        log_format: LogFormat::Text,
    }
}

/// Fixed reference time for delay tests
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn package(id: &str, version: &str) -> InstalledPackage {
    InstalledPackage {
        id: id.to_string(),
        version: version.to_string(),
        is_core: false,
    }
}

pub fn core_package(id: &str, version: &str) -> InstalledPackage {
    InstalledPackage {
        is_core: true,
        ..package(id, version)
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// In-memory installer that records every call
#[derive(Default)]
pub struct FakeInstaller {
    packages: Mutex<Vec<InstalledPackage>>,
    installs: Mutex<Vec<(String, Option<String>)>>,
    failures: Mutex<HashMap<String, usize>>,
    list_failures: AtomicUsize,
}

impl FakeInstaller {
    pub fn with_packages(packages: Vec<InstalledPackage>) -> Self {
        Self {
            packages: Mutex::new(packages),
            ..Self::default()
        }
    }

    /// Make the next `times` installs of `id` fail
    pub fn fail_installs(&self, id: &str, times: usize) {
        self.failures.lock().unwrap().insert(id.to_string(), times);
    }

    /// Make the next `times` calls to `list_installed` fail
    pub fn fail_lists(&self, times: usize) {
        self.list_failures.store(times, Ordering::SeqCst);
    }

    pub fn installs(&self) -> Vec<(String, Option<String>)> {
        self.installs.lock().unwrap().clone()
    }

    pub fn installed_version(&self, id: &str) -> Option<String> {
        self.packages
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.version.clone())
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn list_installed(&self) -> anyhow::Result<Vec<InstalledPackage>> {
        let remaining = self.list_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.list_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("container runtime unavailable");
        }
        Ok(self.packages.lock().unwrap().clone())
    }

    async fn install(&self, id: &str, version: Option<&str>, _options: InstallOptions) -> Result<(), InstallError> {
        self.installs
            .lock()
            .unwrap()
            .push((id.to_string(), version.map(str::to_string)));

        if let Some(remaining) = self.failures.lock().unwrap().get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(InstallError::Failed {
                    id: id.to_string(),
                    status: "exit status: 1".to_string(),
                    message: "image pull failed".to_string(),
                });
            }
        }

        if let Some(version) = version {
            let mut packages = self.packages.lock().unwrap();
            match packages.iter_mut().find(|p| p.id == id) {
                Some(existing) => existing.version = version.to_string(),
                None => packages.push(package(id, version)),
            }
        }
        Ok(())
    }

    async fn remove(&self, id: &str, _options: RemoveOptions) -> Result<(), RemoveError> {
        let mut packages = self.packages.lock().unwrap();
        let before = packages.len();
        packages.retain(|p| p.id != id);
        if packages.len() == before {
            return Err(RemoveError::NotInstalled(id.to_string()));
        }
        Ok(())
    }
}

/// Release source answering from in-memory tables
pub struct FakeReleaseSource {
    available: AtomicBool,
    latest: Mutex<HashMap<String, String>>,
    core: Mutex<CoreUpdateData>,
    queued_core: Mutex<VecDeque<CoreUpdateData>>,
    core_requests: AtomicUsize,
    panic_on_latest: AtomicBool,
}

impl Default for FakeReleaseSource {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
            latest: Mutex::new(HashMap::new()),
            core: Mutex::new(CoreUpdateData::Unavailable),
            queued_core: Mutex::new(VecDeque::new()),
            core_requests: AtomicUsize::new(0),
            panic_on_latest: AtomicBool::new(false),
        }
    }
}

impl FakeReleaseSource {
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_latest(&self, id: &str, version: &str) {
        self.latest.lock().unwrap().insert(id.to_string(), version.to_string());
    }

    pub fn set_core(&self, data: CoreUpdateData) {
        *self.core.lock().unwrap() = data;
    }

    /// Answer the next system set request with `data`, ahead of the value from `set_core`
    pub fn queue_core(&self, data: CoreUpdateData) {
        self.queued_core.lock().unwrap().push_back(data);
    }

    /// Make every `fetch_latest_version` call panic
    pub fn set_panic_on_latest(&self, panic: bool) {
        self.panic_on_latest.store(panic, Ordering::SeqCst);
    }

    pub fn core_requests(&self) -> usize {
        self.core_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseSource for FakeReleaseSource {
    async fn ensure_available(&self) -> Result<(), ReleaseError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ReleaseError::Unavailable("offline".to_string()))
        }
    }

    async fn repo_exists(&self, id: &str) -> Result<bool, ReleaseError> {
        Ok(self.latest.lock().unwrap().contains_key(id))
    }

    async fn fetch_latest_version(&self, id: &str) -> Result<LatestRelease, ReleaseError> {
        if self.panic_on_latest.load(Ordering::SeqCst) {
            panic!("release metadata for {} is corrupt", id);
        }
        self.latest
            .lock()
            .unwrap()
            .get(id)
            .map(|version| LatestRelease {
                version: version.clone(),
            })
            .ok_or_else(|| ReleaseError::NotFound(id.to_string()))
    }

    async fn fetch_core_update_data(&self, _installed_core: &[PackageVersion]) -> Result<CoreUpdateData, ReleaseError> {
        self.core_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(queued) = self.queued_core.lock().unwrap().pop_front() {
            return Ok(queued);
        }
        Ok(self.core.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// An auto-updater wired to fakes, with handles on every collaborator
pub struct Harness {
    pub updater: AutoUpdater,
    pub state: Arc<UpdateStateStore>,
    pub installer: Arc<FakeInstaller>,
    pub releases: Arc<FakeReleaseSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
}

impl Harness {
    pub fn new(packages: Vec<InstalledPackage>) -> Self {
        let state = Arc::new(UpdateStateStore::in_memory(DEFAULT_UPDATE_DELAY));
        let installer = Arc::new(FakeInstaller::with_packages(packages));
        let releases = Arc::new(FakeReleaseSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let events = EventBus::default();

        let updater = AutoUpdater::new(
            Arc::clone(&state),
            installer.clone(),
            releases.clone(),
            events.clone(),
            notifier.clone(),
            clock.clone(),
        );

        Self {
            updater,
            state,
            installer,
            releases,
            notifier,
            clock,
            events,
        }
    }
}
