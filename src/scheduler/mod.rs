// SPDX-License-Identifier: GPL-3.0-only
pub mod coalesce;
pub mod interval;
pub mod sleep;

pub use coalesce::Coalescer;
pub use interval::{IntervalSchedule, run_at_intervals};
pub use sleep::{Aborted, sleep};
