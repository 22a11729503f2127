use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::instance::MigrationReport;
use crate::core::launch::LaunchOutcome;
use crate::core::progress::ProgressSink;
use crate::core::state::AppState;
use crate::core::version::{Branch, PendingUpdateInfo, VersionStatus};

pub type SharedState = Arc<Mutex<AppState>>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchVersions {
    pub branch: Branch,
    pub versions: Vec<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub branch: Branch,
    pub version: u32,
    pub status: VersionStatus,
    pub pending_update: Option<PendingUpdateInfo>,
    pub game_running: bool,
}

/// Branch from the argument, or the configured one.
async fn branch_or_configured(state: &SharedState, branch: Option<Branch>) -> Branch {
    match branch {
        Some(branch) => branch,
        None => state.lock().await.config.snapshot().branch(),
    }
}

pub async fn get_versions(state: &SharedState, branch: Option<Branch>) -> LauncherResult<BranchVersions> {
    let branch = branch_or_configured(state, branch).await;
    let catalog = state.lock().await.catalog.clone();
    let versions = catalog.list_versions(branch).await?;
    Ok(BranchVersions { branch, versions })
}

pub async fn get_status(
    state: &SharedState,
    branch: Option<Branch>,
    version: Option<u32>,
) -> LauncherResult<StatusReport> {
    let (catalog, store, session, config) = {
        let guard = state.lock().await;
        (
            guard.catalog.clone(),
            guard.store.clone(),
            guard.session.clone(),
            guard.config.snapshot(),
        )
    };
    let branch = branch.unwrap_or_else(|| config.branch());
    let version = version.unwrap_or(config.selected_version);

    let status = catalog.version_status(&store, branch, version).await;
    let pending_update = match catalog.pending_update(&store, branch).await {
        Ok(info) => info,
        Err(e) => {
            warn!("Pending update check failed: {}", e);
            None
        }
    };

    Ok(StatusReport {
        branch,
        version,
        status,
        pending_update,
        game_running: session.is_game_running(),
    })
}

/// Persist which branch and version the next launch uses.
pub async fn select_version(state: &SharedState, branch: Branch, version: u32) -> LauncherResult<Config> {
    let config = state.lock().await.config.clone();
    config.update(|c| {
        c.version_type = branch.as_str().to_string();
        c.selected_version = version;
    })?;
    Ok(config.snapshot())
}

pub async fn migrate_legacy_data(state: &SharedState) -> LauncherResult<MigrationReport> {
    let store = state.lock().await.store.clone();
    let report = tokio::task::spawn_blocking(move || store.migrate_legacy_data())
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?;

    for error in &report.errors {
        warn!("Migration: {}", error);
    }
    info!(
        "Migration finished: {} moved, {} copied, {} skipped",
        report.instances_moved, report.instances_copied, report.instances_skipped
    );
    Ok(report)
}

pub async fn launch_game(
    state: &SharedState,
    progress: &ProgressSink,
    cancel: &CancellationToken,
) -> LauncherResult<LaunchOutcome> {
    // The lock is released before launching so force-close stays available.
    let session = state.lock().await.session.clone();
    session.launch(progress, cancel).await
}

pub async fn force_close_instance(state: &SharedState) -> LauncherResult<bool> {
    let session = state.lock().await.session.clone();
    let closed = session.force_close()?;
    if closed {
        info!("Force-closed the running game");
    }
    Ok(closed)
}

pub async fn is_game_running(state: &SharedState) -> bool {
    state.lock().await.session.is_game_running()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppPaths;

    fn shared(tmp: &tempfile::TempDir) -> SharedState {
        let state = AppState::new(AppPaths::new(tmp.path())).unwrap();
        Arc::new(Mutex::new(state))
    }

    #[tokio::test]
    async fn select_version_persists_normalized_branch() {
        let tmp = tempfile::tempdir().unwrap();
        let state = shared(&tmp);

        let config = select_version(&state, Branch::parse("prerelease"), 7).await.unwrap();
        assert_eq!(config.version_type, "pre-release");
        assert_eq!(config.selected_version, 7);

        let raw = std::fs::read_to_string(tmp.path().join("config.json")).unwrap();
        assert!(raw.contains("\"SelectedVersion\": 7"));
        assert_eq!(branch_or_configured(&state, None).await, Branch::PreRelease);
    }

    #[tokio::test]
    async fn force_close_without_game_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let state = shared(&tmp);
        assert!(!force_close_instance(&state).await.unwrap());
        assert!(!is_game_running(&state).await);
    }
}
