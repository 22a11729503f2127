// ─── Runtime Manifest ───
// Where the pinned Java runtime is downloaded from. Resolution order: live
// manifest, manifest bundled next to the executable, hardcoded template.

use std::collections::HashMap;
use std::path::Path;

use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::core::error::{LauncherError, LauncherResult};

pub const RUNTIME_MANIFEST_URL: &str = "https://launcher.hytale.com/version/release/jre.json";

/// Pinned runtime build, also written to the version marker.
pub const RUNTIME_VERSION: &str = "25.0.1_8";

const FALLBACK_URL_TEMPLATE: &str = "https://github.com/adoptium/temurin25-binaries/releases/download/jdk-25.0.1%2B8/OpenJDK25U-jre_{arch}_{os}_hotspot_25.0.1_8.{ext}";

/// `download_url.<os>.<arch>.{url, sha256}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeManifest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub download_url: HashMap<String, HashMap<String, RuntimeDownload>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeDownload {
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSource {
    Live,
    Bundled,
    Fallback,
}

impl RuntimeManifest {
    pub fn entry(&self, os: &str, arch: &str) -> Option<&RuntimeDownload> {
        self.download_url
            .get(os)
            .and_then(|per_arch| per_arch.get(arch))
            .filter(|download| !download.url.trim().is_empty())
    }

    pub async fn fetch(client: &Client, url: &str) -> LauncherResult<Self> {
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    pub fn load(path: &Path) -> LauncherResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| LauncherError::io(path, source))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Hardcoded URL for when no manifest is reachable. No checksum.
pub fn fallback_download(os: &str, arch: &str, ext: &str) -> RuntimeDownload {
    let os = match os {
        "darwin" => "mac",
        other => other,
    };
    let arch = match arch {
        "arm64" => "aarch64",
        _ => "x64",
    };
    RuntimeDownload {
        url: FALLBACK_URL_TEMPLATE
            .replace("{arch}", arch)
            .replace("{os}", os)
            .replace("{ext}", ext),
        sha256: None,
    }
}

/// Walk the three tiers until one yields an entry for `(os, arch)`.
pub async fn resolve_download(
    client: &Client,
    manifest_url: &str,
    bundled: Option<&Path>,
    os: &str,
    arch: &str,
    ext: &str,
) -> (RuntimeDownload, ManifestSource) {
    match RuntimeManifest::fetch(client, manifest_url).await {
        Ok(manifest) => match manifest.entry(os, arch) {
            Some(entry) => return (entry.clone(), ManifestSource::Live),
            None => warn!("Live runtime manifest has no entry for {}/{}", os, arch),
        },
        Err(e) => warn!("Live runtime manifest unavailable: {}", e),
    }

    if let Some(path) = bundled {
        match RuntimeManifest::load(path) {
            Ok(manifest) => {
                if let Some(entry) = manifest.entry(os, arch) {
                    info!("Using bundled runtime manifest {:?}", path);
                    return (entry.clone(), ManifestSource::Bundled);
                }
            }
            Err(e) => warn!("Bundled runtime manifest unreadable: {}", e),
        }
    }

    info!("Falling back to hardcoded runtime URL");
    (fallback_download(os, arch, ext), ManifestSource::Fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "version": "25.0.1_8",
        "download_url": {
            "linux": {
                "amd64": { "url": "https://cdn.example/jre-linux.tar.gz", "sha256": "abc" }
            },
            "windows": {
                "amd64": { "url": "https://cdn.example/jre-win.zip" }
            }
        }
    }"#;

    #[test]
    fn entries_are_looked_up_by_os_and_arch() {
        let manifest: RuntimeManifest = serde_json::from_str(MANIFEST).unwrap();
        let linux = manifest.entry("linux", "amd64").unwrap();
        assert_eq!(linux.sha256.as_deref(), Some("abc"));
        assert_eq!(manifest.entry("windows", "amd64").unwrap().sha256, None);
        assert!(manifest.entry("darwin", "arm64").is_none());
    }

    #[test]
    fn fallback_uses_vendor_naming() {
        let download = fallback_download("darwin", "arm64", "tar.gz");
        assert!(download.url.ends_with("OpenJDK25U-jre_aarch64_mac_hotspot_25.0.1_8.tar.gz"));
        assert!(download.sha256.is_none());
    }

    #[tokio::test]
    async fn tiers_fall_through_in_order() {
        let mut server = mockito::Server::new_async().await;
        let _live = server
            .mock("GET", "/jre.json")
            .with_status(503)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let bundled = tmp.path().join("jre.json");
        std::fs::write(&bundled, MANIFEST).unwrap();

        let client = Client::new();
        let url = format!("{}/jre.json", server.url());

        let (download, source) =
            resolve_download(&client, &url, Some(&bundled), "linux", "amd64", "tar.gz").await;
        assert_eq!(source, ManifestSource::Bundled);
        assert_eq!(download.url, "https://cdn.example/jre-linux.tar.gz");

        let (_, source) =
            resolve_download(&client, &url, Some(&bundled), "darwin", "arm64", "tar.gz").await;
        assert_eq!(source, ManifestSource::Fallback);
    }

    #[tokio::test]
    async fn live_manifest_wins_when_reachable() {
        let mut server = mockito::Server::new_async().await;
        let _live = server
            .mock("GET", "/jre.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(MANIFEST)
            .create_async()
            .await;

        let (download, source) = resolve_download(
            &Client::new(),
            &format!("{}/jre.json", server.url()),
            None,
            "windows",
            "amd64",
            "zip",
        )
        .await;
        assert_eq!(source, ManifestSource::Live);
        assert_eq!(download.url, "https://cdn.example/jre-win.zip");
    }
}
