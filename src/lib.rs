// SPDX-License-Identifier: GPL-3.0-only
pub mod api;
pub mod auto_update;
pub mod config;
pub mod events;
pub mod installer;
pub mod logging;
pub mod notify;
pub mod release;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub mod test_helpers;
