// SPDX-License-Identifier: GPL-3.0-only
//! Composite version identifiers for the system package set.
//!
//! System updates replace several packages at once, so "the version" of the
//! set is the sorted, comma-joined list of `shortName@version` tokens.

use serde::{Deserialize, Serialize};

use crate::auto_update::models::PACKAGE_DOMAIN;
use crate::auto_update::version::satisfies_minimum;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageVersion {
    pub id: String,
    pub version: String,
}

impl PackageVersion {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

fn short_name(id: &str) -> &str {
    id.strip_suffix(PACKAGE_DOMAIN).unwrap_or(id)
}

pub fn encode_version_id(packages: &[PackageVersion]) -> String {
    let mut tokens: Vec<String> = packages
        .iter()
        .filter(|p| !p.id.is_empty() && !p.version.is_empty())
        .map(|p| format!("{}@{}", short_name(&p.id), p.version))
        .collect();
    tokens.sort();
    tokens.join(",")
}

/// Inverse of [`encode_version_id`]. Malformed tokens are skipped.
pub fn decode_version_id(version_id: &str) -> Vec<PackageVersion> {
    version_id
        .split(',')
        .filter_map(|token| {
            let (name, version) = token.trim().split_once('@')?;
            if name.is_empty() || version.is_empty() {
                return None;
            }
            Some(PackageVersion::new(format!("{}{}", name, PACKAGE_DOMAIN), version))
        })
        .collect()
}

/// Whether every package named in `version_id` is installed at that version or newer
pub fn is_version_id_satisfied(version_id: &str, installed: &[PackageVersion]) -> bool {
    decode_version_id(version_id).iter().all(|required| {
        installed
            .iter()
            .any(|pkg| pkg.id == required.id && satisfies_minimum(&pkg.version, &required.version))
    })
}
