use std::path::{Path, PathBuf};

use crate::core::error::{LauncherError, LauncherResult};

pub const APP_DIR_NAME: &str = "HyPrism";
pub const DATA_DIR_ENV: &str = "HYPRISM_DATA_DIR";

/// Well-known locations under the launcher's data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    app_dir: PathBuf,
}

impl AppPaths {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
        }
    }

    /// `$HYPRISM_DATA_DIR` when set, otherwise `<data dir>/HyPrism`.
    pub fn from_environment() -> LauncherResult<Self> {
        let app_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR_NAME),
        };
        std::fs::create_dir_all(&app_dir).map_err(|source| LauncherError::io(&app_dir, source))?;
        Ok(Self::new(app_dir))
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.app_dir.join("config.json")
    }

    pub fn default_instance_root(&self) -> PathBuf {
        self.app_dir.join("instances")
    }

    pub fn version_cache_file(&self) -> PathBuf {
        self.app_dir.join("cache").join("version_cache.json")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.app_dir.join("jre")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.app_dir.join("cache").join("downloads")
    }

    pub fn launch_scripts_dir(&self) -> PathBuf {
        self.app_dir.join("launch")
    }

    pub fn butler_dir(&self) -> PathBuf {
        self.app_dir.join("butler")
    }

    pub fn skins_backup_dir(&self) -> PathBuf {
        self.app_dir.join("skins")
    }

    /// Manifest shipped next to the executable, used when the live one is
    /// unreachable.
    pub fn bundled_runtime_manifest(&self) -> Option<PathBuf> {
        let exe = std::env::current_exe().ok()?;
        let candidate = exe.parent()?.join("resources").join("jre.json");
        candidate.exists().then_some(candidate)
    }
}
