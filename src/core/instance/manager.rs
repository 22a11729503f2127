use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::model::{
    InstanceShape, LatestInstanceInfo, LATEST_DIR, LATEST_INFO_FILE, LEGACY_GAME_DIR,
    USER_DATA_DIR,
};
use super::safe_fs::{comparison_key, dir_is_non_empty};
use crate::core::config::{AppPaths, ConfigStore};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::launch::platform::PlatformStrategy;
use crate::core::version::Branch;

/// Folder names older launchers kept their instances under.
pub const LEGACY_INSTANCE_DIRS: [&str; 2] = ["instance", "instances"];

/// Locates and lays out game instances on disk.
///
/// The canonical layout is `<root>/<branch>/<version>/` with `latest/` for the
/// auto-updating instance. Lookups also accept the two dash-separated legacy
/// shapes and any legacy launcher root, so installs made by older builds keep
/// working before migration ran.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    paths: AppPaths,
    config: Arc<ConfigStore>,
    platform: Arc<dyn PlatformStrategy>,
    legacy_roots: Vec<PathBuf>,
}

impl InstanceStore {
    pub fn new(
        paths: AppPaths,
        config: Arc<ConfigStore>,
        platform: Arc<dyn PlatformStrategy>,
    ) -> Self {
        Self {
            paths,
            config,
            platform,
            legacy_roots: legacy_root_candidates(),
        }
    }

    /// Replace the well-known legacy launcher directories (tests point these
    /// into a temp dir).
    pub fn with_legacy_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.legacy_roots = roots;
        self
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn platform(&self) -> &Arc<dyn PlatformStrategy> {
        &self.platform
    }

    pub fn legacy_roots(&self) -> &[PathBuf] {
        &self.legacy_roots
    }

    /// Active instance root, created on demand.
    ///
    /// A configured directory may use `~`, `$VAR`, `${VAR}` or `%VAR%`;
    /// relative values resolve against the app directory.
    pub fn resolve_root(&self) -> LauncherResult<PathBuf> {
        let root = match self.config.snapshot().instance_directory_override() {
            Some(dir) => {
                let expanded = PathBuf::from(expand_env(&dir.to_string_lossy()));
                if expanded.is_absolute() {
                    expanded
                } else {
                    self.paths.app_dir().join(expanded)
                }
            }
            None => self.paths.default_instance_root(),
        };

        std::fs::create_dir_all(&root).map_err(|source| LauncherError::io(&root, source))?;
        Ok(root)
    }

    /// Canonical path for `(branch, version)`; version `0` is `latest/`.
    pub fn instance_path(&self, branch: Branch, version: u32) -> LauncherResult<PathBuf> {
        Ok(self
            .resolve_root()?
            .join(InstanceShape::Nested.relative_path(branch, version)))
    }

    pub fn latest_path(&self, branch: Branch) -> LauncherResult<PathBuf> {
        Ok(self.resolve_root()?.join(branch.as_str()).join(LATEST_DIR))
    }

    /// Every root that may hold instances, current root first, without
    /// duplicates.
    pub fn all_roots(&self) -> LauncherResult<Vec<PathBuf>> {
        let mut roots = vec![self.resolve_root()?, self.paths.default_instance_root()];
        for legacy in &self.legacy_roots {
            for name in LEGACY_INSTANCE_DIRS {
                roots.push(legacy.join(name));
            }
        }

        let mut seen = HashSet::new();
        roots.retain(|root| seen.insert(comparison_key(root)));
        Ok(roots)
    }

    /// Find an installed instance across all roots and shapes.
    ///
    /// Only a folder holding the client executable counts. Payloads nested
    /// under `game/` are returned at that depth.
    pub fn find_existing(&self, branch: Branch, version: u32) -> LauncherResult<Option<PathBuf>> {
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        for root in self.all_roots()? {
            for shape in InstanceShape::ALL {
                let candidate = root.join(shape.relative_path(branch, version));
                if seen.insert(comparison_key(&candidate)) {
                    candidates.push(candidate);
                }
            }
        }

        for candidate in &candidates {
            if self.is_client_installed(candidate) {
                return Ok(Some(candidate.clone()));
            }
            let nested = candidate.join(LEGACY_GAME_DIR);
            if self.is_client_installed(&nested) {
                return Ok(Some(nested));
            }
        }

        Ok(None)
    }

    /// Existing instance if any, otherwise the canonical path.
    pub fn resolve_instance_path(&self, branch: Branch, version: u32) -> LauncherResult<PathBuf> {
        match self.find_existing(branch, version)? {
            Some(found) => {
                debug!("Resolved {}/{} to {:?}", branch, version, found);
                Ok(found)
            }
            None => self.instance_path(branch, version),
        }
    }

    pub fn client_executable(&self, instance_dir: &Path) -> PathBuf {
        self.platform.resolve_executable_path(instance_dir)
    }

    pub fn is_client_installed(&self, instance_dir: &Path) -> bool {
        self.client_executable(instance_dir).is_file()
    }

    pub fn user_data_dir(&self, instance_dir: &Path) -> PathBuf {
        instance_dir.join(USER_DATA_DIR)
    }

    pub fn has_user_data(&self, instance_dir: &Path) -> bool {
        dir_is_non_empty(&self.user_data_dir(instance_dir))
    }

    /// Numbered versions of `branch` installed under the current root,
    /// newest first.
    pub fn installed_versions(&self, branch: Branch) -> LauncherResult<Vec<u32>> {
        let branch_dir = self.resolve_root()?.join(branch.as_str());
        let entries = match std::fs::read_dir(&branch_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(LauncherError::io(&branch_dir, source)),
        };

        let mut versions: Vec<u32> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let version = entry.file_name().to_str()?.parse::<u32>().ok()?;
                self.is_client_installed(&entry.path()).then_some(version)
            })
            .filter(|version| *version > 0)
            .collect();
        versions.sort_unstable_by(|a, b| b.cmp(a));
        Ok(versions)
    }

    /// Marker of which version `latest/` holds. Missing or corrupt reads as
    /// `None`.
    pub async fn read_latest_info(&self, branch: Branch) -> LauncherResult<Option<LatestInstanceInfo>> {
        let path = self.latest_path(branch)?.join(LATEST_INFO_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LauncherError::io(&path, source)),
        };

        match serde_json::from_str::<LatestInstanceInfo>(&raw) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                warn!("Ignoring corrupt {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    pub async fn write_latest_info(&self, branch: Branch, version: u32) -> LauncherResult<()> {
        let dir = self.latest_path(branch)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| LauncherError::io(&dir, source))?;

        let path = dir.join(LATEST_INFO_FILE);
        let json = serde_json::to_string_pretty(&LatestInstanceInfo::now(version))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| LauncherError::io(&path, source))?;

        info!("Latest {} instance now holds version {}", branch, version);
        Ok(())
    }
}

/// Directories previous launcher builds used as their data root.
pub fn legacy_root_candidates() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if cfg!(target_os = "windows") {
        if let Some(roaming) = dirs::config_dir() {
            roots.push(roaming.join("HyPrism"));
            roots.push(roaming.join("hyprism"));
        }
        if let Some(local) = dirs::data_local_dir() {
            roots.push(local.join("HyPrism"));
        }
    } else if cfg!(target_os = "macos") {
        if let Some(support) = dirs::data_dir() {
            roots.push(support.join("HyPrism"));
            roots.push(support.join("hyprism"));
        }
    } else {
        if let Some(share) = dirs::data_dir() {
            roots.push(share.join("HyPrism"));
            roots.push(share.join("hyprism"));
        }
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".hyprism"));
        }
    }

    let mut seen = HashSet::new();
    roots.retain(|root| seen.insert(comparison_key(root)));
    roots
}

/// Expand `~`, `$VAR`, `${VAR}` and `%VAR%`. Unknown variables are left as
/// written.
pub fn expand_env(raw: &str) -> String {
    let raw = raw.trim();
    let home_expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => {
            match dirs::home_dir() {
                Some(home) => format!("{}{}", home.to_string_lossy(), rest),
                None => raw.to_string(),
            }
        }
        _ => raw.to_string(),
    };

    let chars: Vec<char> = home_expanded.chars().collect();
    let mut out = String::with_capacity(home_expanded.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '%' => {
                if let Some(len) = chars[i + 1..].iter().position(|c| *c == '%') {
                    let name: String = chars[i + 1..i + 1 + len].iter().collect();
                    if is_var_name(&name) {
                        if let Ok(value) = std::env::var(&name) {
                            out.push_str(&value);
                            i += len + 2;
                            continue;
                        }
                    }
                }
                out.push('%');
                i += 1;
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                if let Some(len) = chars[i + 2..].iter().position(|c| *c == '}') {
                    let name: String = chars[i + 2..i + 2 + len].iter().collect();
                    if let Ok(value) = std::env::var(&name) {
                        out.push_str(&value);
                        i += len + 3;
                        continue;
                    }
                }
                out.push('$');
                i += 1;
            }
            '$' => {
                let len = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                    .count();
                if len > 0 {
                    let name: String = chars[i + 1..i + 1 + len].iter().collect();
                    if let Ok(value) = std::env::var(&name) {
                        out.push_str(&value);
                        i += len + 1;
                        continue;
                    }
                }
                out.push('$');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '(' || c == ')')
}
