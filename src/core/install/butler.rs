// ─── Butler installer ───
// Game builds ship as wharf patches (`.pwr`). A fresh install applies the
// `0 → v` patch into an empty directory, an update applies each `v-1 → v`
// patch in order. `butler` does the applying.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::downloader::Downloader;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::java::runtime::{ensure_executable, extract};
use crate::core::progress::{LaunchStage, ProgressSink};
use crate::core::version::{Branch, VersionCatalog};

use super::{GameInstaller, InstallOutcome, InstallRequest};

pub const BUTLER_BASE_URL: &str = "https://broth.itch.zone/butler";

#[derive(Debug, Clone)]
pub struct ButlerInstaller {
    downloader: Downloader,
    catalog: Arc<VersionCatalog>,
    butler_dir: PathBuf,
    downloads_dir: PathBuf,
    butler_url: String,
}

impl ButlerInstaller {
    pub fn new(
        downloader: Downloader,
        catalog: Arc<VersionCatalog>,
        butler_dir: PathBuf,
        downloads_dir: PathBuf,
        os: &str,
        arch: &str,
    ) -> Self {
        // butler publishes no arm64 builds for macOS; Rosetta runs amd64.
        let arch = if os == "darwin" { "amd64" } else { arch };
        Self {
            downloader,
            catalog,
            butler_dir,
            downloads_dir,
            butler_url: format!("{BUTLER_BASE_URL}/{os}-{arch}/LATEST/archive/default"),
        }
    }

    pub fn with_butler_url(mut self, url: impl Into<String>) -> Self {
        self.butler_url = url.into();
        self
    }

    pub fn butler_binary(&self) -> PathBuf {
        let name = if cfg!(windows) { "butler.exe" } else { "butler" };
        self.butler_dir.join(name)
    }

    async fn ensure_butler(&self, cancel: &CancellationToken) -> LauncherResult<PathBuf> {
        let binary = self.butler_binary();
        if binary.is_file() {
            return Ok(binary);
        }

        info!("Fetching butler from {}", self.butler_url);
        let archive = self.downloads_dir.join("butler.zip");
        self.downloader
            .download_file(&self.butler_url, &archive, None, Some(cancel), |_, _| {})
            .await?;

        let dir = self.butler_dir.clone();
        let archive_for_extract = archive.clone();
        tokio::task::spawn_blocking(move || extract::extract_archive(&archive_for_extract, &dir))
            .await
            .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))??;
        let _ = tokio::fs::remove_file(&archive).await;

        if !binary.is_file() {
            return Err(LauncherError::Installer(format!(
                "butler archive did not contain {}",
                binary.display()
            )));
        }
        ensure_executable(&binary)?;
        Ok(binary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_patch(
        &self,
        butler: &Path,
        branch: Branch,
        from: u32,
        to: u32,
        instance_dir: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
        (lo, hi): (u8, u8),
    ) -> LauncherResult<()> {
        let url = self.catalog.patch_url(branch, from, to);
        let patch = self
            .downloads_dir
            .join(format!("{}-{}-{}.pwr", branch, from, to));

        let mid = lo + ((u16::from(hi - lo) * 3) / 4) as u8;
        let mut scaled = progress.scaled(LaunchStage::Preparing, lo, mid, "launch.install.download");
        self.downloader
            .download_file(&url, &patch, None, Some(cancel), |done, total| {
                scaled.report_bytes(done, total)
            })
            .await?;

        if cancel.is_cancelled() {
            let _ = tokio::fs::remove_file(&patch).await;
            return Err(LauncherError::Cancelled);
        }

        let version = to.to_string();
        progress.progress(LaunchStage::Preparing, mid, "launch.install.apply", &[version.as_str()]);
        let staging = self.downloads_dir.join(format!("staging-{branch}-{to}"));
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|source| LauncherError::io(&staging, source))?;

        debug!("butler apply {:?} -> {:?}", patch, instance_dir);
        let output = tokio::process::Command::new(butler)
            .arg("apply")
            .arg("--staging-dir")
            .arg(&staging)
            .arg(&patch)
            .arg(instance_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| LauncherError::io(butler, source))?;

        let _ = tokio::fs::remove_dir_all(&staging).await;
        let _ = tokio::fs::remove_file(&patch).await;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(LauncherError::Installer(format!(
                "butler failed applying {from} -> {to} ({}): {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        progress.progress(LaunchStage::Preparing, hi, "launch.install.applied", &[version.as_str()]);
        info!("Applied {} patch {} -> {}", branch, from, to);
        Ok(())
    }
}

#[async_trait]
impl GameInstaller for ButlerInstaller {
    #[instrument(skip(self, request), fields(branch = %request.branch, version = request.version))]
    async fn ensure_installed(&self, request: InstallRequest<'_>) -> LauncherResult<InstallOutcome> {
        let InstallRequest {
            store,
            branch,
            version,
            instance_dir,
            progress,
            cancel,
        } = request;

        let target = if version == 0 {
            let latest = self
                .catalog
                .latest_version(branch)
                .await
                .and_then(|latest| latest.ok_or_else(|| LauncherError::CatalogUnavailable(branch.to_string())));
            match latest {
                Ok(latest) => latest,
                Err(e) if store.is_client_installed(instance_dir) => {
                    let local = store.read_latest_info(branch).await?.map_or(0, |info| info.version);
                    warn!("Version check failed, launching installed {} {}: {}", branch, local, e);
                    return Ok(InstallOutcome::AlreadyCurrent { version: local });
                }
                Err(e) => return Err(e),
            }
        } else {
            version
        };

        let installed = store.is_client_installed(instance_dir);
        let current = match (installed, version) {
            (false, _) => None,
            (true, 0) => match store.read_latest_info(branch).await? {
                Some(info) => Some(info.version),
                None => {
                    warn!("Installed {} client has no version marker, adopting {}", branch, target);
                    store.write_latest_info(branch, target).await?;
                    return Ok(InstallOutcome::AlreadyCurrent { version: target });
                }
            },
            (true, pinned) => Some(pinned),
        };

        if let Some(current) = current {
            if current >= target {
                if current > target {
                    warn!("Local {} version {} is ahead of remote {}", branch, current, target);
                }
                return Ok(InstallOutcome::AlreadyCurrent { version: current });
            }
        }

        let steps: Vec<(u32, u32)> = match current {
            Some(from) => self
                .catalog
                .verified_patch_sequence(branch, from, target)
                .await?
                .into_iter()
                .map(|v| (v - 1, v))
                .collect(),
            None => vec![(0, target)],
        };

        let butler = self.ensure_butler(cancel).await?;
        tokio::fs::create_dir_all(instance_dir)
            .await
            .map_err(|source| LauncherError::io(instance_dir, source))?;

        let count = steps.len();
        for (index, (from, to)) in steps.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(LauncherError::Cancelled);
            }
            let lo = (index * 100 / count) as u8;
            let hi = ((index + 1) * 100 / count) as u8;
            self.apply_patch(&butler, branch, from, to, instance_dir, progress, cancel, (lo, hi))
                .await?;
            // The marker follows every applied link so a failed update resumes from here.
            if version == 0 {
                store.write_latest_info(branch, to).await?;
            }
        }

        Ok(match current {
            Some(from) => InstallOutcome::Updated { from, to: target },
            None => InstallOutcome::Installed { version: target },
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use reqwest::Client;

    use super::*;
    use crate::core::config::{AppPaths, Config, ConfigStore};
    use crate::core::instance::InstanceStore;
    use crate::core::launch::platform::LinuxPlatform;
    use crate::core::version::{VersionCache, DEFAULT_PATCH_HOST};

    /// Stand-in for butler: "applies" a patch by copying it over the client
    /// binary and logging which patch ran.
    const FAKE_BUTLER: &str = r#"#!/bin/sh
mkdir -p "$5/Client"
cp "$4" "$5/Client/HytaleClient"
basename "$4" >> "$5/applied.log"
"#;

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: InstanceStore,
        installer: ButlerInstaller,
        cache_path: PathBuf,
    }

    fn fixture(server_url: &str) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(tmp.path());
        let config = Arc::new(ConfigStore::in_memory(paths.config_file(), Config::default()));
        let store = InstanceStore::new(paths.clone(), config, Arc::new(LinuxPlatform))
            .with_legacy_roots(Vec::new());

        let cache_path = paths.version_cache_file();
        let catalog = VersionCatalog::new(
            Client::new(),
            DEFAULT_PATCH_HOST,
            cache_path.clone(),
            "linux",
            "amd64",
        )
        .with_base_url(format!("{server_url}/patches"));

        std::fs::create_dir_all(paths.butler_dir()).unwrap();
        let butler = paths.butler_dir().join("butler");
        std::fs::write(&butler, FAKE_BUTLER).unwrap();
        ensure_executable(&butler).unwrap();

        let installer = ButlerInstaller::new(
            Downloader::new(Client::new()),
            Arc::new(catalog),
            paths.butler_dir(),
            paths.downloads_dir(),
            "linux",
            "amd64",
        );
        Fixture {
            _tmp: tmp,
            store,
            installer,
            cache_path,
        }
    }

    #[tokio::test]
    async fn pinned_version_installs_from_zero_once() {
        let mut server = mockito::Server::new_async().await;
        let full = server
            .mock("GET", "/patches/linux/amd64/release/0/4.pwr")
            .with_status(200)
            .with_body("client-v4")
            .expect(1)
            .create_async()
            .await;

        let fx = fixture(&server.url());
        let dir = fx.store.instance_path(Branch::Release, 4).unwrap();
        let cancel = CancellationToken::new();
        let progress = ProgressSink::disabled();
        let request = || InstallRequest {
            store: &fx.store,
            branch: Branch::Release,
            version: 4,
            instance_dir: &dir,
            progress: &progress,
            cancel: &cancel,
        };

        let outcome = fx.installer.ensure_installed(request()).await.unwrap();
        assert_eq!(outcome, InstallOutcome::Installed { version: 4 });
        assert_eq!(
            std::fs::read_to_string(dir.join("Client/HytaleClient")).unwrap(),
            "client-v4"
        );

        let again = fx.installer.ensure_installed(request()).await.unwrap();
        assert_eq!(again, InstallOutcome::AlreadyCurrent { version: 4 });
        full.assert_async().await;
    }

    #[tokio::test]
    async fn failed_update_link_leaves_marker_at_last_applied_version() {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = Vec::new();
        for version in 1..=3 {
            mocks.push(
                server
                    .mock("HEAD", format!("/patches/linux/amd64/release/0/{version}.pwr").as_str())
                    .with_status(200)
                    .create_async()
                    .await,
            );
        }
        for version in 2..=3 {
            let path = format!("/patches/linux/amd64/release/{}/{version}.pwr", version - 1);
            mocks.push(server.mock("HEAD", path.as_str()).with_status(200).create_async().await);
            mocks.push(
                server
                    .mock("GET", path.as_str())
                    .with_status(200)
                    .with_body(format!("client-v{version}"))
                    .create_async()
                    .await,
            );
        }

        let fx = fixture(&server.url());
        std::fs::write(
            fx.installer.butler_binary(),
            format!(
                "#!/bin/sh\ncase \"$4\" in *release-2-3.pwr) echo corrupt >&2; exit 1;; esac\n{}",
                FAKE_BUTLER.trim_start_matches("#!/bin/sh\n")
            ),
        )
        .unwrap();
        let mut cache = VersionCache::default();
        cache.set_known(Branch::Release, [1, 2, 3]);
        cache.save(&fx.cache_path).await.unwrap();

        let dir = fx.store.latest_path(Branch::Release).unwrap();
        std::fs::create_dir_all(dir.join("Client")).unwrap();
        std::fs::write(dir.join("Client/HytaleClient"), "client-v1").unwrap();
        fx.store.write_latest_info(Branch::Release, 1).await.unwrap();

        let err = fx
            .installer
            .ensure_installed(InstallRequest {
                store: &fx.store,
                branch: Branch::Release,
                version: 0,
                instance_dir: &dir,
                progress: &ProgressSink::disabled(),
                cancel: &CancellationToken::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LauncherError::Installer(_)));
        assert_eq!(
            std::fs::read_to_string(dir.join("Client/HytaleClient")).unwrap(),
            "client-v2"
        );
        let info = fx.store.read_latest_info(Branch::Release).await.unwrap().unwrap();
        assert_eq!(info.version, 2);
    }

    #[tokio::test]
    async fn installed_latest_launches_when_catalog_is_unreachable() {
        let fx = fixture("http://127.0.0.1:1");
        let dir = fx.store.latest_path(Branch::Release).unwrap();
        std::fs::create_dir_all(dir.join("Client")).unwrap();
        std::fs::write(dir.join("Client/HytaleClient"), "client-v5").unwrap();
        fx.store.write_latest_info(Branch::Release, 5).await.unwrap();

        let progress = ProgressSink::disabled();
        let cancel = CancellationToken::new();
        let request = || InstallRequest {
            store: &fx.store,
            branch: Branch::Release,
            version: 0,
            instance_dir: &dir,
            progress: &progress,
            cancel: &cancel,
        };
        let outcome = fx.installer.ensure_installed(request()).await.unwrap();
        assert_eq!(outcome, InstallOutcome::AlreadyCurrent { version: 5 });

        std::fs::remove_file(dir.join("Client/HytaleClient")).unwrap();
        let err = fx.installer.ensure_installed(request()).await.unwrap_err();
        assert!(matches!(err, LauncherError::CatalogUnavailable(_)));
    }

    #[tokio::test]
    async fn butler_is_fetched_once_and_made_executable() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let mut archive = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        archive
            .start_file("butler", zip::write::SimpleFileOptions::default())
            .unwrap();
        archive.write_all(b"#!/bin/sh\n").unwrap();
        let body = archive.finish().unwrap().into_inner();

        let mut server = mockito::Server::new_async().await;
        let download = server
            .mock("GET", "/butler/linux-amd64")
            .with_status(200)
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let catalog = VersionCatalog::new(
            Client::new(),
            DEFAULT_PATCH_HOST,
            tmp.path().join("cache.json"),
            "linux",
            "amd64",
        );
        let installer = ButlerInstaller::new(
            Downloader::new(Client::new()),
            Arc::new(catalog),
            tmp.path().join("butler"),
            tmp.path().join("downloads"),
            "linux",
            "amd64",
        )
        .with_butler_url(format!("{}/butler/linux-amd64", server.url()));

        let cancel = CancellationToken::new();
        let binary = installer.ensure_butler(&cancel).await.unwrap();
        assert_eq!(binary, installer.butler_binary());
        let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
        assert!(!tmp.path().join("downloads/butler.zip").exists());

        installer.ensure_butler(&cancel).await.unwrap();
        download.assert_async().await;
    }

    #[tokio::test]
    async fn latest_applies_each_incremental_patch() {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = Vec::new();
        for version in 1..=3 {
            mocks.push(
                server
                    .mock("HEAD", format!("/patches/linux/amd64/release/0/{version}.pwr").as_str())
                    .with_status(200)
                    .create_async()
                    .await,
            );
        }
        for version in 2..=3 {
            let path = format!("/patches/linux/amd64/release/{}/{version}.pwr", version - 1);
            mocks.push(server.mock("HEAD", path.as_str()).with_status(200).create_async().await);
            mocks.push(
                server
                    .mock("GET", path.as_str())
                    .with_status(200)
                    .with_body(format!("client-v{version}"))
                    .create_async()
                    .await,
            );
        }

        let fx = fixture(&server.url());
        let mut cache = VersionCache::default();
        cache.set_known(Branch::Release, [1, 2, 3]);
        cache.save(&fx.cache_path).await.unwrap();

        let dir = fx.store.latest_path(Branch::Release).unwrap();
        std::fs::create_dir_all(dir.join("Client")).unwrap();
        std::fs::write(dir.join("Client/HytaleClient"), "client-v1").unwrap();
        fx.store.write_latest_info(Branch::Release, 1).await.unwrap();

        let outcome = fx
            .installer
            .ensure_installed(InstallRequest {
                store: &fx.store,
                branch: Branch::Release,
                version: 0,
                instance_dir: &dir,
                progress: &ProgressSink::disabled(),
                cancel: &CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, InstallOutcome::Updated { from: 1, to: 3 });
        assert_eq!(
            std::fs::read_to_string(dir.join("applied.log")).unwrap(),
            "release-1-2.pwr\nrelease-2-3.pwr\n"
        );
        let info = fx.store.read_latest_info(Branch::Release).await.unwrap().unwrap();
        assert_eq!(info.version, 3);
    }
}
