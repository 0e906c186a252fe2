// SPDX-License-Identifier: GPL-3.0-only
pub mod http;
pub mod system_set;
pub mod traits;

pub use http::HttpReleaseSource;
pub use system_set::core_update_from;
pub use traits::{CoreUpdateData, LatestRelease, ReleaseError, ReleaseSource};
