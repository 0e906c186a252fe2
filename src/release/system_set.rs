// SPDX-License-Identifier: GPL-3.0-only
use crate::auto_update::version::{UpdateType, classify_update};
use crate::auto_update::version_id::{PackageVersion, encode_version_id};
use crate::release::traits::CoreUpdateData;

fn severity(update: UpdateType) -> u8 {
    match update {
        UpdateType::Patch => 1,
        UpdateType::Minor => 2,
        UpdateType::Major => 3,
    }
}

/// Compare a published system package set against the installed one.
///
/// The set moves as one unit, so its classification is the most severe
/// change among its packages. Packages not installed yet only contribute to
/// the composite version id.
pub fn core_update_from(installed: &[PackageVersion], published: &[PackageVersion]) -> CoreUpdateData {
    let classification = published
        .iter()
        .filter_map(|latest| {
            let current = installed.iter().find(|pkg| pkg.id == latest.id)?;
            classify_update(&current.version, &latest.version)
        })
        .max_by_key(|update| severity(*update));

    match classification {
        Some(classification) => CoreUpdateData::Available {
            classification,
            version_id: encode_version_id(published),
        },
        None => CoreUpdateData::Unavailable,
    }
}
