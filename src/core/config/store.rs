use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};

use super::model::Config;
use crate::core::error::{LauncherError, LauncherResult};

/// Owns the launcher config and writes it back on every mutation.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: RwLock<Config>,
}

impl ConfigStore {
    /// Load `path`, falling back to defaults when the file is missing or
    /// unreadable. A corrupt file is left on disk untouched until the next
    /// save replaces it.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Corrupt config at {:?}: {}", path, e);
                    Config::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => {
                warn!("Cannot read config {:?}: {}", path, e);
                Config::default()
            }
        };

        Self {
            path,
            config: RwLock::new(config),
        }
    }

    pub fn in_memory(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            config: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply `f` and persist the result when anything changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut Config) -> R) -> LauncherResult<R> {
        let (result, changed, snapshot) = {
            let mut guard = self
                .config
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let before = guard.clone();
            let result = f(&mut guard);
            let changed = *guard != before;
            (result, changed, guard.clone())
        };

        if changed {
            self.save(&snapshot)?;
        }
        Ok(result)
    }

    pub fn save(&self, config: &Config) -> LauncherResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LauncherError::io(parent, source))?;
        }
        let json = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| LauncherError::io(&tmp, source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| LauncherError::io(&self.path, source))?;
        debug!("Saved config to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults_and_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(&path);
        assert_eq!(store.snapshot(), Config::default());
        assert!(!path.exists());

        store.update(|config| config.nick = "Steve".into()).unwrap();
        assert!(path.exists());

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.snapshot().nick, "Steve");
    }

    #[test]
    fn unchanged_update_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(&path);
        store.update(|_| ()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = ConfigStore::load(&path);
        assert_eq!(store.snapshot(), Config::default());
    }
}
