//! Deterministic asset selection.

use super::{Asset, Release};
use crate::error::{Error, Result};
use tracing::debug;

/// Package file extension of installable assets.
const PACKAGE_EXT: &str = "deb";

/// Architecture tag of architecture-independent packages.
const ARCH_ALL: &str = "all";

/// Pick the asset to install from `release`.
///
/// Assets named `<app>_<anything>_<arch>.deb` are preferred; otherwise
/// `<app>_<anything>_all.deb` is used. Within each group the first asset in
/// release order wins.
///
/// # Errors
///
/// Returns [`Error::NoMatchingAsset`] if neither pattern matches.
pub fn select_asset<'a>(release: &'a Release, app_name: &str, arch: &str) -> Result<&'a Asset> {
    let exact = release
        .assets
        .iter()
        .filter(|a| matches_pattern(&a.name, app_name, arch));
    let portable = release
        .assets
        .iter()
        .filter(|a| matches_pattern(&a.name, app_name, ARCH_ALL));

    let chosen = exact.chain(portable).next().ok_or_else(|| Error::NoMatchingAsset {
        tag: release.tag.clone(),
        app: app_name.to_string(),
        arch: arch.to_string(),
    })?;

    debug!("Selected asset {} from {}", chosen.name, release.tag);
    Ok(chosen)
}

/// `<app>_<anything>_<arch>.<ext>` with the prefix and suffix not overlapping.
fn matches_pattern(name: &str, app_name: &str, arch: &str) -> bool {
    let suffix = format!("_{arch}.{PACKAGE_EXT}");
    name.strip_prefix(app_name)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|rest| rest.ends_with(&suffix))
}
