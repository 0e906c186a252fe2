// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use async_trait::async_trait;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::installer::traits::{
    InstallError, InstallOptions, InstalledPackage, Installer, RemoveError, RemoveOptions,
};

/// Exit code the wrapper uses to report that a package to remove is not installed
const EXIT_NOT_INSTALLED: i32 = 2;

/// Drives installs through an external container-tooling wrapper.
///
/// The wrapper understands three subcommands:
/// `list` prints the installed packages as a JSON array,
/// `install <id> [version] [--auto-update]` and
/// `remove <id> [--delete-volumes]`.
///
/// Calls are not cancelled on shutdown; a started install always runs to completion.
pub struct CommandInstaller {
    program: String,
    base_args: Vec<String>,
}

impl CommandInstaller {
    /// `command` is split on whitespace into the program and its leading arguments
    pub fn new(command: &str) -> anyhow::Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().context("Installer command is empty")?;

        Ok(Self {
            program,
            base_args: parts.collect(),
        })
    }

    async fn run(&self, args: &[&str]) -> std::io::Result<Output> {
        debug!(program = %self.program, ?args, "Running installer");
        Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
    }
}

fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn list_installed(&self) -> anyhow::Result<Vec<InstalledPackage>> {
        let output = self.run(&["list"]).await.context("Failed to run installer")?;
        if !output.status.success() {
            anyhow::bail!("Listing packages failed ({}): {}", output.status, failure_message(&output));
        }

        let packages: Vec<InstalledPackage> = serde_json::from_slice(&output.stdout)
            .context("Installer returned an invalid package list")?;
        debug!(count = packages.len(), "Listed installed packages");
        Ok(packages)
    }

    async fn install(&self, id: &str, version: Option<&str>, options: InstallOptions) -> Result<(), InstallError> {
        let mut args = vec!["install", id];
        if let Some(version) = version {
            args.push(version);
        }
        if options.auto_update {
            args.push("--auto-update");
        }

        info!(package = %id, version = ?version, "Installing package");
        let output = self.run(&args).await.map_err(InstallError::Spawn)?;

        if !output.status.success() {
            let message = failure_message(&output);
            warn!(package = %id, status = %output.status, error = %message, "Install failed");
            return Err(InstallError::Failed {
                id: id.to_string(),
                status: output.status.to_string(),
                message,
            });
        }

        info!(package = %id, "Package installed");
        Ok(())
    }

    async fn remove(&self, id: &str, options: RemoveOptions) -> Result<(), RemoveError> {
        let mut args = vec!["remove", id];
        if options.delete_volumes {
            args.push("--delete-volumes");
        }

        info!(package = %id, delete_volumes = options.delete_volumes, "Removing package");
        let output = self.run(&args).await.map_err(RemoveError::Spawn)?;

        if output.status.code() == Some(EXIT_NOT_INSTALLED) {
            return Err(RemoveError::NotInstalled(id.to_string()));
        }
        if !output.status.success() {
            return Err(RemoveError::Failed {
                id: id.to_string(),
                status: output.status.to_string(),
                message: failure_message(&output),
            });
        }

        info!(package = %id, "Package removed");
        Ok(())
    }
}
