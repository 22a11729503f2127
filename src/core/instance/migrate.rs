// ─── Legacy data migration ───
// Brings configs and instance folders written by older launcher builds into
// the current layout. Each root and each folder is handled on its own: one
// failure is logged and recorded, the rest still migrate. Running it again
// on an already migrated tree changes nothing.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use super::legacy_config::{merge_into, prioritize_legacy, recover_uuid_file, LegacyConfig};
use super::manager::{InstanceStore, LEGACY_INSTANCE_DIRS};
use super::model::{is_migrated_name, InstanceShape, LegacyFolder, LEGACY_GAME_DIR};
use super::safe_fs::{comparison_key, remove_dir_if_empty, safe_copy_dir, safe_move_dir_contents, same_path};
use crate::core::config::parse_uuid;
use crate::core::error::{LauncherError, LauncherResult};

const LEGACY_JSON_CONFIG: &str = "config.json";
const LEGACY_TOML_CONFIG: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub config_merged: bool,
    pub uuid_recovered: bool,
    pub instances_moved: usize,
    pub instances_copied: usize,
    pub instances_skipped: usize,
    pub errors: Vec<String>,
}

impl MigrationReport {
    fn record_error(&mut self, context: &str, error: impl std::fmt::Display) {
        warn!("Migration step failed ({}): {}", context, error);
        self.errors.push(format!("{context}: {error}"));
    }
}

impl InstanceStore {
    /// Migrate every legacy root into the current config and instance root.
    pub fn migrate_legacy_data(&self) -> MigrationReport {
        let mut report = MigrationReport::default();

        for legacy_root in self.legacy_roots() {
            if !legacy_root.is_dir() {
                continue;
            }
            if let Err(e) = self.migrate_legacy_config(legacy_root, &mut report) {
                report.record_error(&format!("config in {}", legacy_root.display()), e);
            }
        }

        let current_root = match self.resolve_root() {
            Ok(root) => root,
            Err(e) => {
                report.record_error("instance root", e);
                return report;
            }
        };

        for dir in self.legacy_instance_dirs(&current_root) {
            if !dir.is_dir() {
                continue;
            }
            if let Err(e) = self.migrate_instance_dir(&dir, &current_root, &mut report) {
                report.record_error(&format!("instances in {}", dir.display()), e);
            }
        }

        info!(
            "Legacy migration done: merged={} moved={} copied={} skipped={} errors={}",
            report.config_merged,
            report.instances_moved,
            report.instances_copied,
            report.instances_skipped,
            report.errors.len()
        );
        report
    }

    /// Current root first so in-place restructuring runs before any copy
    /// could target the same folders.
    fn legacy_instance_dirs(&self, current_root: &Path) -> Vec<PathBuf> {
        let mut dirs = vec![current_root.to_path_buf()];
        for legacy_root in self.legacy_roots() {
            for name in LEGACY_INSTANCE_DIRS {
                dirs.push(legacy_root.join(name));
            }
        }
        let mut seen = std::collections::HashSet::new();
        dirs.retain(|dir| seen.insert(comparison_key(dir)));
        dirs
    }

    fn migrate_legacy_config(&self, legacy_root: &Path, report: &mut MigrationReport) -> LauncherResult<()> {
        let json_path = legacy_root.join(LEGACY_JSON_CONFIG);
        let toml_path = legacy_root.join(LEGACY_TOML_CONFIG);

        let json = if json_path.is_file() && !same_path(&json_path, self.config().path()) {
            match LegacyConfig::load_json(&json_path) {
                Ok(config) => Some(config),
                Err(e) => {
                    report.record_error(&format!("read {}", json_path.display()), e);
                    None
                }
            }
        } else {
            None
        };

        let toml = if toml_path.is_file() {
            Some(LegacyConfig::load_toml(&toml_path)?)
        } else {
            None
        };
        let had_toml = toml.is_some();

        // The winning file sets the identity, the other one only fills gaps.
        let ordered = prioritize_legacy(json, toml);
        if !ordered.is_empty() {
            let merged = self.config().update(|config| {
                ordered
                    .iter()
                    .fold(false, |changed, legacy| merge_into(config, legacy) | changed)
            })?;
            report.config_merged |= merged;
            if merged {
                info!("Merged legacy config from {:?}", legacy_root);
            }
        }

        if had_toml {
            match std::fs::remove_file(&toml_path) {
                Ok(()) => info!("Removed migrated {:?}", toml_path),
                Err(e) => report.record_error(&format!("remove {}", toml_path.display()), e),
            }
        }

        if self.config().snapshot().uuid.as_deref().and_then(parse_uuid).is_none() {
            if let Some(uuid) = recover_uuid_file(legacy_root) {
                let recovered = self.config().update(|config| {
                    if config.uuid.as_deref().and_then(parse_uuid).is_some() {
                        return false;
                    }
                    config.uuid = Some(uuid.clone());
                    true
                })?;
                report.uuid_recovered |= recovered;
            }
        }

        Ok(())
    }

    fn migrate_instance_dir(
        &self,
        dir: &Path,
        current_root: &Path,
        report: &mut MigrationReport,
    ) -> LauncherResult<()> {
        let in_place = same_path(dir, current_root);

        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|source| LauncherError::io(dir, source))?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        entries.sort();

        for entry in entries {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            let result = match LegacyFolder::parse(&name) {
                Some(folder) => self.migrate_legacy_folder(&entry, folder, current_root, in_place, report),
                // Already-canonical branch folders of a foreign root.
                None if !in_place && is_migrated_name(&name) => {
                    match safe_copy_dir(&entry, &current_root.join(&name)) {
                        Ok(true) => {
                            report.instances_copied += 1;
                            Ok(())
                        }
                        Ok(false) => {
                            report.instances_skipped += 1;
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                None => continue,
            };

            if let Err(e) = result {
                report.record_error(&format!("migrate {}", entry.display()), e);
            }
        }

        Ok(())
    }

    fn migrate_legacy_folder(
        &self,
        entry: &Path,
        folder: LegacyFolder,
        current_root: &Path,
        in_place: bool,
        report: &mut MigrationReport,
    ) -> LauncherResult<()> {
        let target = current_root.join(InstanceShape::Nested.relative_path(folder.branch, folder.version));
        if self.is_client_installed(&target) {
            report.instances_skipped += 1;
            return Ok(());
        }

        let nested = entry.join(LEGACY_GAME_DIR);
        let payload = if nested.is_dir() { nested } else { entry.to_path_buf() };

        if in_place {
            if safe_move_dir_contents(&payload, &target)? {
                remove_dir_if_empty(&payload);
                remove_dir_if_empty(entry);
                report.instances_moved += 1;
                info!("Restructured {:?} -> {:?}", entry, target);
            } else {
                report.instances_skipped += 1;
            }
        } else if safe_copy_dir(&payload, &target)? {
            report.instances_copied += 1;
            info!("Copied {:?} -> {:?}", payload, target);
        } else {
            report.instances_skipped += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::config::{AppPaths, Config, ConfigStore};
    use crate::core::launch::platform::LinuxPlatform;

    const OLD_UUID: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn install_client(dir: &Path) {
        write(&dir.join("Client").join("HytaleClient"), "bin");
    }

    fn tree(root: &Path) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(dir).unwrap().flatten() {
                let path = entry.path();
                out.push(path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"));
                if path.is_dir() {
                    stack.push(path);
                }
            }
        }
        out.sort();
        out
    }

    fn fixture(tmp: &Path) -> InstanceStore {
        let app = tmp.join("app");
        let old = tmp.join("old");

        install_client(&app.join("instances").join("release-v5"));
        write(&app.join("instances/release-v5/UserData/save.dat"), "save");
        install_client(&app.join("instances").join("pre-release-latest").join("game"));
        install_client(&old.join("instances").join("release-3"));
        write(
            &old.join("config.json"),
            &format!(r#"{{"Nick":"JsonNick","UUID":"{OLD_UUID}"}}"#),
        );
        write(&old.join("config.toml"), "nick = \"TomlNick\"\n");

        let paths = AppPaths::new(&app);
        let config = Arc::new(ConfigStore::in_memory(paths.config_file(), Config::default()));
        InstanceStore::new(paths, config, Arc::new(LinuxPlatform))
            .with_legacy_roots(vec![old, app])
    }

    #[test]
    fn migrates_configs_and_instance_layouts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = fixture(tmp.path());
        let report = store.migrate_legacy_data();
        assert!(report.errors.is_empty(), "{:?}", report.errors);

        let config = store.config().snapshot();
        assert_eq!(config.nick, "TomlNick");
        assert!(!tmp.path().join("old/config.toml").exists());

        let root = tmp.path().join("app/instances");
        assert!(store.is_client_installed(&root.join("release/5")));
        assert!(root.join("release/5/UserData/save.dat").exists());
        assert!(!root.join("release-v5").exists());
        assert!(store.is_client_installed(&root.join("pre-release/latest")));
        assert!(!root.join("pre-release-latest").exists());

        assert!(store.is_client_installed(&root.join("release/3")));
        assert!(store.is_client_installed(&tmp.path().join("old/instances/release-3")));

        assert_eq!(report.instances_moved, 2);
        assert_eq!(report.instances_copied, 1);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let store = fixture(tmp.path());
        store.migrate_legacy_data();
        let before = tree(tmp.path());
        let config_before = store.config().snapshot();

        let report = store.migrate_legacy_data();
        assert_eq!(tree(tmp.path()), before);
        assert_eq!(store.config().snapshot(), config_before);
        assert!(!report.config_merged);
        assert_eq!(report.instances_moved + report.instances_copied, 0);
    }

    #[test]
    fn current_config_file_is_never_merged_into_itself() {
        let tmp = tempfile::tempdir().unwrap();
        let app = tmp.path().join("app");
        write(&app.join("config.json"), r#"{"Nick":"Someone"}"#);

        let paths = AppPaths::new(&app);
        let config = Arc::new(ConfigStore::in_memory(paths.config_file(), Config::default()));
        let store = InstanceStore::new(paths, config, Arc::new(LinuxPlatform))
            .with_legacy_roots(vec![app.clone()]);

        let report = store.migrate_legacy_data();
        assert!(!report.config_merged);
        assert_eq!(store.config().snapshot().nick, "Player");
    }

    #[test]
    fn uuid_file_fills_missing_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let old = tmp.path().join("old");
        write(&old.join("uuid.txt"), OLD_UUID);

        let paths = AppPaths::new(tmp.path().join("app"));
        let config = Arc::new(ConfigStore::in_memory(paths.config_file(), Config::default()));
        let store = InstanceStore::new(paths, config, Arc::new(LinuxPlatform))
            .with_legacy_roots(vec![old]);

        let report = store.migrate_legacy_data();
        assert!(report.uuid_recovered);
        assert_eq!(store.config().snapshot().uuid.as_deref(), Some(OLD_UUID));
    }
}
