// SPDX-License-Identifier: GPL-3.0-only
pub mod command;
pub mod traits;

pub use command::CommandInstaller;
pub use traits::{InstallError, InstallOptions, InstalledPackage, Installer, RemoveError, RemoveOptions};
