// ─── Legacy launcher configs ───
// Older launcher generations wrote `config.json` with inconsistent key casing
// and, later, `config.toml`. Both are read into the same loose shape and
// merged into the current config without overwriting user choices.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::config::{is_placeholder_nick, parse_uuid, Config};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::version::normalize_version_type;

const NICK_KEYS: [&str; 4] = ["nick", "name", "username", "nickname"];
const UUID_KEYS: [&str; 1] = ["uuid"];
const INSTANCE_DIR_KEYS: [&str; 4] = [
    "instance_directory",
    "instancedirectory",
    "instance_dir",
    "instancedir",
];
const BRANCH_KEYS: [&str; 3] = ["versiontype", "version_type", "branch"];
const SELECTED_VERSION_KEYS: [&str; 2] = ["selectedversion", "selected_version"];

/// Files some launcher builds used to persist nothing but the UUID.
pub const UUID_FILE_NAMES: [&str; 3] = ["uuid.txt", "uuid", "uuid.dat"];

/// Fields recovered from a legacy config, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyConfig {
    pub nick: Option<String>,
    pub uuid: Option<String>,
    pub instance_directory: Option<String>,
    pub version_type: Option<String>,
    pub selected_version: Option<u32>,
}

impl LegacyConfig {
    pub fn is_empty(&self) -> bool {
        *self == LegacyConfig::default()
    }

    pub fn has_custom_nick(&self) -> bool {
        self.nick
            .as_deref()
            .map(|nick| !nick.trim().is_empty() && !is_placeholder_nick(nick))
            .unwrap_or(false)
    }

    /// Keys are matched case-insensitively, nested objects are ignored.
    pub fn from_json_str(raw: &str) -> LauncherResult<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(map) = value else {
            return Ok(LegacyConfig::default());
        };

        let mut fields: Vec<(String, String)> = Vec::with_capacity(map.len());
        for (key, value) in map {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            fields.push((key, text));
        }
        Ok(Self::from_pairs(fields))
    }

    /// Parsed with the `toml` crate first. Files that older launchers wrote
    /// by hand are not always valid TOML, those go through a line parser.
    pub fn from_toml_str(raw: &str) -> Self {
        match toml::from_str::<toml::Table>(raw) {
            Ok(table) => {
                let fields = table.into_iter().filter_map(|(key, value)| {
                    let text = match value {
                        toml::Value::String(s) => s,
                        toml::Value::Integer(i) => i.to_string(),
                        toml::Value::Boolean(b) => b.to_string(),
                        toml::Value::Float(f) => f.to_string(),
                        _ => return None,
                    };
                    Some((key, text))
                });
                Self::from_pairs(fields)
            }
            Err(e) => {
                debug!("Strict TOML parse failed ({}), using line parser", e);
                Self::from_pairs(parse_lenient_toml(raw))
            }
        }
    }

    pub fn load_json(path: &Path) -> LauncherResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| LauncherError::io(path, source))?;
        Self::from_json_str(&raw)
    }

    pub fn load_toml(path: &Path) -> LauncherResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| LauncherError::io(path, source))?;
        Ok(Self::from_toml_str(&raw))
    }

    fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut legacy = LegacyConfig::default();
        for (key, value) in pairs {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }

            if NICK_KEYS.contains(&key.as_str()) {
                legacy.nick.get_or_insert(value);
            } else if UUID_KEYS.contains(&key.as_str()) {
                legacy.uuid.get_or_insert(value);
            } else if INSTANCE_DIR_KEYS.contains(&key.as_str()) {
                legacy.instance_directory.get_or_insert(value);
            } else if BRANCH_KEYS.contains(&key.as_str()) {
                legacy.version_type.get_or_insert(value);
            } else if SELECTED_VERSION_KEYS.contains(&key.as_str()) {
                if let Ok(version) = value.parse::<u32>() {
                    legacy.selected_version.get_or_insert(version);
                }
            }
        }
        legacy
    }
}

/// `key = value` lines. `#` starts a comment, `[section]` headers are
/// skipped, only the first `=` splits.
pub fn parse_lenient_toml(raw: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_matches('"').trim_matches('\'');
        if key.is_empty() {
            continue;
        }
        pairs.push((key.to_string(), parse_lenient_value(value.trim())));
    }
    pairs
}

fn parse_lenient_value(value: &str) -> String {
    if let Some(rest) = value.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = rest.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '"' => break,
                '\\' => match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                },
                other => out.push(other),
            }
        }
        return out;
    }

    if let Some(rest) = value.strip_prefix('\'') {
        return rest.split('\'').next().unwrap_or_default().to_string();
    }

    let bare = match value.find(" #") {
        Some(idx) => &value[..idx],
        None => value,
    };
    bare.trim().to_string()
}

/// Pick the legacy config whose identity should win.
///
/// A TOML file carrying a real nickname beats everything, then a JSON file
/// with a real nickname, then whichever file exists at all (TOML first).
pub fn choose_legacy(json: Option<LegacyConfig>, toml: Option<LegacyConfig>) -> Option<LegacyConfig> {
    prioritize_legacy(json, toml).into_iter().next()
}

/// Non-empty legacy configs, winner first.
pub fn prioritize_legacy(json: Option<LegacyConfig>, toml: Option<LegacyConfig>) -> Vec<LegacyConfig> {
    let json = json.filter(|c| !c.is_empty());
    let toml = toml.filter(|c| !c.is_empty());

    let json_first = json.as_ref().is_some_and(LegacyConfig::has_custom_nick)
        && !toml.as_ref().is_some_and(LegacyConfig::has_custom_nick);

    let ordered = if json_first { [json, toml] } else { [toml, json] };
    ordered.into_iter().flatten().collect()
}

/// Fold `legacy` into `config`. Existing user data is never replaced.
/// Returns whether anything changed.
pub fn merge_into(config: &mut Config, legacy: &LegacyConfig) -> bool {
    let mut changed = false;

    let current_is_placeholder = config.nick.trim().is_empty() || is_placeholder_nick(&config.nick);
    if current_is_placeholder && legacy.has_custom_nick() {
        if let Some(nick) = &legacy.nick {
            config.nick = nick.trim().to_string();
            changed = true;
        }
    }

    let current_uuid = config.uuid.as_deref().and_then(parse_uuid);
    if current_uuid.is_none() {
        if let Some(uuid) = legacy.uuid.as_deref().and_then(parse_uuid) {
            config.uuid = Some(uuid.to_string());
            changed = true;
        }
    }

    if let Some(uuid) = config.uuid.as_deref().and_then(parse_uuid) {
        let nick = config.nick.trim().to_string();
        let owned = config
            .user_uuids
            .keys()
            .any(|name| name.eq_ignore_ascii_case(&nick));
        if !nick.is_empty() && !owned {
            config.user_uuids.insert(nick, uuid.to_string());
            changed = true;
        }
    }

    if config.instance_directory_override().is_none() {
        if let Some(dir) = legacy
            .instance_directory
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
        {
            config.instance_directory = Some(dir.to_string());
            changed = true;
        }
    }

    if config.version_type.trim().is_empty() {
        if let Some(branch) = &legacy.version_type {
            config.version_type = normalize_version_type(branch).to_string();
            changed = true;
        }
    }

    if config.selected_version == 0 {
        if let Some(version) = legacy.selected_version.filter(|v| *v > 0) {
            config.selected_version = version;
            changed = true;
        }
    }

    changed
}

/// First well-formed UUID found in one of the standalone UUID files.
pub fn recover_uuid_file(dir: &Path) -> Option<String> {
    for name in UUID_FILE_NAMES {
        let path = dir.join(name);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        match parse_uuid(&raw) {
            Some(uuid) => return Some(uuid.to_string()),
            None => warn!("Ignoring malformed UUID file {:?}", path),
        }
    }
    None
}
