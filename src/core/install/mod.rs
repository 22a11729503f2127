pub mod butler;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::error::LauncherResult;
use crate::core::instance::InstanceStore;
use crate::core::progress::ProgressSink;
use crate::core::version::Branch;

pub use butler::{ButlerInstaller, BUTLER_BASE_URL};

/// Everything an installer needs for one `(branch, version)` install.
pub struct InstallRequest<'a> {
    pub store: &'a InstanceStore,
    pub branch: Branch,
    /// `0` tracks the newest version.
    pub version: u32,
    pub instance_dir: &'a Path,
    pub progress: &'a ProgressSink,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstallOutcome {
    AlreadyCurrent { version: u32 },
    Installed { version: u32 },
    Updated { from: u32, to: u32 },
}

impl InstallOutcome {
    pub fn version(&self) -> u32 {
        match self {
            InstallOutcome::AlreadyCurrent { version } | InstallOutcome::Installed { version } => *version,
            InstallOutcome::Updated { to, .. } => *to,
        }
    }
}

/// Brings an instance directory to the requested game version.
#[async_trait]
pub trait GameInstaller: Send + Sync {
    async fn ensure_installed(&self, request: InstallRequest<'_>) -> LauncherResult<InstallOutcome>;
}
