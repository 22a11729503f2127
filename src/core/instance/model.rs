use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::version::Branch;

/// Folder name holding the "latest" instance of a branch.
pub const LATEST_DIR: &str = "latest";
pub const LATEST_INFO_FILE: &str = "latest.json";
pub const USER_DATA_DIR: &str = "UserData";
/// Older launchers nested the whole payload one level deeper.
pub const LEGACY_GAME_DIR: &str = "game";

/// Names that already belong to the new layout. Never treated as legacy.
pub const MIGRATED_NAMES: [&str; 3] = ["release", "pre-release", LATEST_DIR];

/// Which version the `latest/` folder of a branch currently holds.
///
/// Persisted as `<root>/<branch>/latest/latest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestInstanceInfo {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

impl LatestInstanceInfo {
    pub fn now(version: u32) -> Self {
        Self {
            version,
            updated_at: Utc::now(),
        }
    }
}

/// On-disk shapes an instance folder may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceShape {
    /// `root/branch/version/`
    Nested,
    /// `root/branch-version/`
    LegacyDash,
    /// `root/branch-vVersion/`
    LegacyDashV,
}

impl InstanceShape {
    pub const ALL: [InstanceShape; 3] = [
        InstanceShape::Nested,
        InstanceShape::LegacyDash,
        InstanceShape::LegacyDashV,
    ];

    /// Path relative to an instance root. Version `0` is the latest folder.
    pub fn relative_path(&self, branch: Branch, version: u32) -> std::path::PathBuf {
        let version_part = version_folder(version);
        match self {
            InstanceShape::Nested => std::path::Path::new(branch.as_str()).join(version_part),
            InstanceShape::LegacyDash => format!("{}-{}", branch.as_str(), version_part).into(),
            InstanceShape::LegacyDashV => {
                format!("{}-v{}", branch.as_str(), version_part).into()
            }
        }
    }
}

pub fn version_folder(version: u32) -> String {
    if version == 0 {
        LATEST_DIR.to_string()
    } else {
        version.to_string()
    }
}

pub fn is_migrated_name(name: &str) -> bool {
    MIGRATED_NAMES
        .iter()
        .any(|migrated| migrated.eq_ignore_ascii_case(name))
}

/// A folder recognised as legacy layout, e.g. `release-v5` or
/// `pre-release-3`. Version `0` stands for `latest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyFolder {
    pub branch: Branch,
    pub version: u32,
}

impl LegacyFolder {
    pub fn parse(name: &str) -> Option<LegacyFolder> {
        if is_migrated_name(name) {
            return None;
        }

        let (branch_part, version_part) = name.rsplit_once('-')?;
        let branch = match branch_part.trim().to_ascii_lowercase().as_str() {
            "release" => Branch::Release,
            "pre-release" | "prerelease" | "pre_release" | "beta" => Branch::PreRelease,
            _ => return None,
        };

        let version_part = version_part.trim();
        if version_part.eq_ignore_ascii_case(LATEST_DIR) {
            return Some(LegacyFolder { branch, version: 0 });
        }
        let digits = version_part
            .strip_prefix('v')
            .or_else(|| version_part.strip_prefix('V'))
            .unwrap_or(version_part);
        let version = digits.parse::<u32>().ok().filter(|v| *v > 0)?;
        Some(LegacyFolder { branch, version })
    }
}
