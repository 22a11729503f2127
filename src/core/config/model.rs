use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::version::Branch;

/// Nicknames shipped as defaults by every launcher generation. A config
/// carrying one of these has no user-chosen identity yet.
pub const PLACEHOLDER_NICKS: [&str; 3] = ["Player", "Hyprism", "HyPrism"];

pub const DEFAULT_NICK: &str = "Player";

pub fn is_placeholder_nick(nick: &str) -> bool {
    let nick = nick.trim();
    PLACEHOLDER_NICKS
        .iter()
        .any(|placeholder| placeholder.eq_ignore_ascii_case(nick))
}

/// Accepts only well-formed GUID text (hyphenated or braced/simple forms).
pub fn parse_uuid(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

/// Launcher configuration persisted as `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub instance_directory: Option<String>,
    /// `0` means "latest".
    pub selected_version: u32,
    pub version_type: String,
    pub nick: String,
    #[serde(rename = "UUID")]
    pub uuid: Option<String>,
    /// Nickname → UUID, so switching names never re-derives an identity.
    pub user_uuids: BTreeMap<String, String>,
    pub online_mode: bool,
    pub auth_domain: Option<String>,
    pub patch_domain: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_directory: None,
            selected_version: 0,
            version_type: Branch::Release.as_str().to_string(),
            nick: DEFAULT_NICK.to_string(),
            uuid: None,
            user_uuids: BTreeMap::new(),
            online_mode: false,
            auth_domain: None,
            patch_domain: None,
        }
    }
}

impl Config {
    pub fn branch(&self) -> Branch {
        Branch::parse(&self.version_type)
    }

    pub fn instance_directory_override(&self) -> Option<PathBuf> {
        self.instance_directory
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }

    pub fn has_custom_nick(&self) -> bool {
        !self.nick.trim().is_empty() && !is_placeholder_nick(&self.nick)
    }

    /// Auth domain when online mode is enabled and a domain is configured.
    pub fn active_auth_domain(&self) -> Option<&str> {
        if !self.online_mode {
            return None;
        }
        self.auth_domain
            .as_deref()
            .map(str::trim)
            .filter(|domain| !domain.is_empty())
    }

    /// Stable UUID for `nick`.
    ///
    /// Lookup is case-insensitive. A nick seen for the first time adopts the
    /// legacy top-level `UUID` when no other name owns it yet, otherwise gets
    /// a fresh v4. Returns the UUID and whether the config changed.
    pub fn uuid_for_user(&mut self, nick: &str) -> (Uuid, bool) {
        let key = nick.trim();

        let known = self
            .user_uuids
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .and_then(|(_, raw)| parse_uuid(raw));
        if let Some(uuid) = known {
            return (uuid, false);
        }

        let legacy = self.uuid.as_deref().and_then(parse_uuid).filter(|legacy| {
            !self
                .user_uuids
                .values()
                .filter_map(|raw| parse_uuid(raw))
                .any(|owned| owned == *legacy)
        });

        let uuid = legacy.unwrap_or_else(Uuid::new_v4);
        self.user_uuids
            .retain(|name, _| !name.eq_ignore_ascii_case(key));
        self.user_uuids.insert(key.to_string(), uuid.to_string());
        if key.eq_ignore_ascii_case(self.nick.trim()) {
            self.uuid = Some(uuid.to_string());
        }
        (uuid, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection_is_case_insensitive() {
        assert!(is_placeholder_nick("Player"));
        assert!(is_placeholder_nick("hyprism"));
        assert!(is_placeholder_nick(" HyPrism "));
        assert!(!is_placeholder_nick("Steve"));
    }

    #[test]
    fn uuid_is_stable_per_name_across_nick_changes() {
        let mut config = Config {
            nick: "Alice".into(),
            ..Config::default()
        };
        let (alice, changed) = config.uuid_for_user("Alice");
        assert!(changed);

        config.nick = "Bob".into();
        let (bob, _) = config.uuid_for_user("Bob");
        assert_ne!(alice, bob);

        config.nick = "alice".into();
        let (again, changed) = config.uuid_for_user("alice");
        assert_eq!(again, alice);
        assert!(!changed);
    }

    #[test]
    fn first_user_adopts_legacy_uuid() {
        let legacy = "0f8fad5b-d9cb-469f-a165-70867728950e";
        let mut config = Config {
            nick: "Steve".into(),
            uuid: Some(legacy.into()),
            ..Config::default()
        };
        let (uuid, _) = config.uuid_for_user("Steve");
        assert_eq!(uuid.to_string(), legacy);

        let (other, _) = config.uuid_for_user("Alex");
        assert_ne!(other.to_string(), legacy);
    }

    #[test]
    fn config_round_trips_pascal_case_keys() {
        let raw = r#"{"Nick":"Steve","UUID":"0f8fad5b-d9cb-469f-a165-70867728950e","VersionType":"prerelease","UserUuids":{"Steve":"0f8fad5b-d9cb-469f-a165-70867728950e"}}"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.nick, "Steve");
        assert_eq!(config.branch(), Branch::PreRelease);
        assert_eq!(config.selected_version, 0);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"UserUuids\""));
        assert!(json.contains("\"UUID\""));
    }

    #[test]
    fn auth_domain_requires_online_mode() {
        let mut config = Config {
            auth_domain: Some("example.org".into()),
            ..Config::default()
        };
        assert_eq!(config.active_auth_domain(), None);
        config.online_mode = true;
        assert_eq!(config.active_auth_domain(), Some("example.org"));
    }
}
