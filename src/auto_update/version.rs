// SPDX-License-Identifier: GPL-3.0-only
use regex::Regex;
use semver::{BuildMetadata, Version};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::LazyLock;

static NUMERIC_CORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("numeric version pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Major,
    Minor,
    Patch,
}

/// Parse a full semantic version, accepting a leading `v` or `=`
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('='))
        .unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

/// Reduce a loosely formatted version to its first `major[.minor[.patch]]` run.
///
/// Missing components become zero and anything around the numbers is ignored,
/// so `"1.2.3.4"` coerces to `1.2.3` and `"v2-beta"` to `2.0.0`.
pub fn coerce_version(raw: &str) -> Option<Version> {
    let caps = NUMERIC_CORE.captures(raw)?;
    let component = |index: usize| -> Option<u64> {
        match caps.get(index) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };
    Some(Version::new(component(1)?, component(2)?, component(3)?))
}

/// Semver precedence, which ignores build metadata
fn cmp_precedence(a: &Version, b: &Version) -> Ordering {
    let strip = |v: &Version| Version {
        build: BuildMetadata::EMPTY,
        ..v.clone()
    };
    strip(a).cmp(&strip(b))
}

/// Whether `candidate` is strictly newer than `current`. Unparseable versions are never newer.
pub fn is_newer(current: &str, candidate: &str) -> bool {
    match (parse_version(current), parse_version(candidate)) {
        (Some(current), Some(candidate)) => cmp_precedence(&candidate, &current) == Ordering::Greater,
        _ => false,
    }
}

/// Whether `installed` is at least `required`. Unparseable versions never satisfy.
pub fn satisfies_minimum(installed: &str, required: &str) -> bool {
    match (parse_version(installed), parse_version(required)) {
        (Some(installed), Some(required)) => cmp_precedence(&installed, &required) != Ordering::Less,
        _ => false,
    }
}

/// Classify the transition `from -> to`.
///
/// Returns `None` for unparseable versions, downgrades and no-ops, and when the
/// versions only differ outside major/minor/patch.
pub fn classify_update(from: &str, to: &str) -> Option<UpdateType> {
    if !is_newer(from, to) {
        return None;
    }

    let from = coerce_version(from)?;
    let to = coerce_version(to)?;

    if from.major != to.major {
        Some(UpdateType::Major)
    } else if from.minor != to.minor {
        Some(UpdateType::Minor)
    } else if from.patch != to.patch {
        Some(UpdateType::Patch)
    } else {
        None
    }
}
