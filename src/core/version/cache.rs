use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::branch::Branch;
use crate::core::error::{LauncherError, LauncherResult};

/// Versions seen on the patch server, persisted as `version_cache.json`.
///
/// Advisory only: a missing or stale cache just means more probing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionCache {
    pub known_versions: BTreeMap<String, BTreeSet<u32>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl VersionCache {
    pub async fn load(path: &Path) -> Self {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot read version cache {:?}: {}", path, e);
                }
                return Self::default();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Discarding corrupt version cache {:?}: {}", path, e);
            Self::default()
        })
    }

    pub async fn save(&self, path: &Path) -> LauncherResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LauncherError::io(parent, source))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| LauncherError::io(path, source))?;
        debug!("Saved version cache to {:?}", path);
        Ok(())
    }

    pub fn known(&self, branch: Branch) -> BTreeSet<u32> {
        self.known_versions
            .get(branch.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_known(&mut self, branch: Branch, versions: impl IntoIterator<Item = u32>) {
        self.known_versions
            .insert(branch.as_str().to_string(), versions.into_iter().collect());
        self.last_updated = Some(Utc::now());
    }
}
