use serde::Serialize;
use tracing::warn;

use super::branch::Branch;
use super::catalog::VersionCatalog;
use crate::core::error::LauncherResult;
use crate::core::instance::{InstanceStore, LatestInstanceInfo};

/// Where an instance of a branch stands against the server.
///
/// Recomputed on every query, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Server reachable, no versions published.
    None,
    NotInstalled,
    UpdateAvailable,
    Current,
    /// Probing the server failed.
    Error,
}

/// `remote` is `None` when the catalog could not be queried. A pinned
/// `selected_version` never has updates: it is current once installed.
pub fn compute_status(
    remote: Option<&[u32]>,
    selected_version: u32,
    client_installed: bool,
    local_version: Option<u32>,
) -> VersionStatus {
    let Some(remote) = remote else {
        return VersionStatus::Error;
    };
    let Some(latest) = remote.first().copied() else {
        return VersionStatus::None;
    };
    if !client_installed {
        return VersionStatus::NotInstalled;
    }
    if selected_version != 0 {
        return VersionStatus::Current;
    }
    match local_version {
        Some(local) if local >= latest => VersionStatus::Current,
        _ => VersionStatus::UpdateAvailable,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdateInfo {
    pub old_version: u32,
    pub new_version: u32,
    /// The caller must offer to carry `UserData` forward when set.
    pub has_old_user_data: bool,
    pub branch: Branch,
}

/// `None` unless the server has something newer than `local`.
pub fn pending_update_info(
    branch: Branch,
    local: Option<&LatestInstanceInfo>,
    remote: &[u32],
    has_old_user_data: bool,
) -> Option<PendingUpdateInfo> {
    let local = local?;
    let newest = remote.first().copied()?;
    if newest <= local.version {
        return None;
    }
    Some(PendingUpdateInfo {
        old_version: local.version,
        new_version: newest,
        has_old_user_data,
        branch,
    })
}

impl VersionCatalog {
    /// Status of `version` (`0` = latest) of `branch`.
    pub async fn version_status(
        &self,
        store: &InstanceStore,
        branch: Branch,
        version: u32,
    ) -> VersionStatus {
        let remote = match self.list_versions(branch).await {
            Ok(versions) => Some(versions),
            Err(e) => {
                warn!("Version status for {} unavailable: {}", branch, e);
                None
            }
        };

        let (installed, local) = match store.resolve_instance_path(branch, version) {
            Ok(instance_dir) => {
                let local = if version == 0 {
                    store.read_latest_info(branch).await.ok().flatten()
                } else {
                    None
                };
                (store.is_client_installed(&instance_dir), local.map(|info| info.version))
            }
            Err(e) => {
                warn!("Instance root unavailable: {}", e);
                (false, None)
            }
        };

        compute_status(remote.as_deref(), version, installed, local)
    }

    pub async fn pending_update(
        &self,
        store: &InstanceStore,
        branch: Branch,
    ) -> LauncherResult<Option<PendingUpdateInfo>> {
        let Some(local) = store.read_latest_info(branch).await? else {
            return Ok(None);
        };
        let remote = self.list_versions(branch).await?;
        let has_user_data = store.has_user_data(&store.latest_path(branch)?);
        Ok(pending_update_info(branch, Some(&local), &remote, has_user_data))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::config::{AppPaths, Config, ConfigStore};
    use crate::core::launch::platform::LinuxPlatform;

    #[test]
    fn status_covers_all_states() {
        assert_eq!(compute_status(None, 0, true, Some(3)), VersionStatus::Error);
        assert_eq!(compute_status(Some(&[]), 0, false, None), VersionStatus::None);
        assert_eq!(compute_status(Some(&[8, 7]), 0, false, None), VersionStatus::NotInstalled);
        assert_eq!(compute_status(Some(&[8, 7]), 0, true, Some(7)), VersionStatus::UpdateAvailable);
        assert_eq!(compute_status(Some(&[8, 7]), 0, true, None), VersionStatus::UpdateAvailable);
        assert_eq!(compute_status(Some(&[8, 7]), 0, true, Some(8)), VersionStatus::Current);
    }

    #[test]
    fn pinned_versions_are_current_once_installed() {
        assert_eq!(compute_status(Some(&[8, 7]), 7, true, None), VersionStatus::Current);
        assert_eq!(compute_status(Some(&[8, 7]), 7, false, None), VersionStatus::NotInstalled);
    }

    #[test]
    fn pending_update_only_when_newer() {
        let local = LatestInstanceInfo::now(6);
        let info = pending_update_info(Branch::Release, Some(&local), &[8, 7, 6], true).unwrap();
        assert_eq!(info.old_version, 6);
        assert_eq!(info.new_version, 8);
        assert!(info.has_old_user_data);

        assert_eq!(pending_update_info(Branch::Release, Some(&local), &[6, 5], true), None);
        assert_eq!(pending_update_info(Branch::Release, None, &[8], true), None);
    }

    #[tokio::test]
    async fn pending_update_reads_local_marker_and_user_data() {
        let mut server = mockito::Server::new_async().await;
        let _eight = server
            .mock("HEAD", "/patches/linux/amd64/release/0/8.pwr")
            .with_status(200)
            .create_async()
            .await;
        let _seven = server
            .mock("HEAD", "/patches/linux/amd64/release/0/7.pwr")
            .with_status(200)
            .create_async()
            .await;
        let _six = server
            .mock("HEAD", "/patches/linux/amd64/release/0/6.pwr")
            .with_status(200)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(tmp.path());
        let store = InstanceStore::new(
            paths.clone(),
            Arc::new(ConfigStore::in_memory(paths.config_file(), Config::default())),
            Arc::new(LinuxPlatform),
        )
        .with_legacy_roots(Vec::new());

        let mut cache = crate::core::version::VersionCache::default();
        cache.set_known(Branch::Release, [6]);
        cache.save(&paths.version_cache_file()).await.unwrap();

        let catalog = VersionCatalog::new(
            reqwest::Client::new(),
            "unused.invalid",
            paths.version_cache_file(),
            "linux",
            "amd64",
        )
        .with_base_url(format!("{}/patches", server.url()));

        assert_eq!(catalog.pending_update(&store, Branch::Release).await.unwrap(), None);

        store.write_latest_info(Branch::Release, 6).await.unwrap();
        let user_data = store.latest_path(Branch::Release).unwrap().join("UserData");
        std::fs::create_dir_all(&user_data).unwrap();
        std::fs::write(user_data.join("settings.json"), "{}").unwrap();

        let info = catalog
            .pending_update(&store, Branch::Release)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            info,
            PendingUpdateInfo {
                old_version: 6,
                new_version: 8,
                has_old_user_data: true,
                branch: Branch::Release,
            }
        );
    }
}
