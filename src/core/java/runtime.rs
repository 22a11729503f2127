use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::manifest::{resolve_download, ManifestSource, RUNTIME_MANIFEST_URL, RUNTIME_VERSION};
use super::shim;
use crate::core::downloader::Downloader;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::launch::platform::{platform_arch, PlatformStrategy};
use crate::core::progress::{LaunchStage, ProgressSink};

/// Marker written beside the runtime once an install fully succeeded.
pub const VERSION_MARKER: &str = ".jre_version";

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("unsupported archive: {0}")]
    UnsupportedArchive(String),
    #[error("invalid runtime: {0}")]
    InvalidRuntime(String),
}

impl From<RuntimeError> for LauncherError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::Io { path, source } => LauncherError::Io { path, source },
            RuntimeError::Zip(source) => LauncherError::Zip(source),
            RuntimeError::UnsupportedArchive(message) | RuntimeError::InvalidRuntime(message) => {
                LauncherError::Runtime(message)
            }
        }
    }
}

/// Installs and pins the Java runtime the game server needs.
#[derive(Debug, Clone)]
pub struct RuntimeProvisioner {
    downloader: Downloader,
    platform: Arc<dyn PlatformStrategy>,
    runtime_dir: PathBuf,
    downloads_dir: PathBuf,
    bundled_manifest: Option<PathBuf>,
    manifest_url: String,
    arch: String,
    required_version: String,
}

impl RuntimeProvisioner {
    pub fn new(
        downloader: Downloader,
        platform: Arc<dyn PlatformStrategy>,
        runtime_dir: PathBuf,
        downloads_dir: PathBuf,
    ) -> Self {
        Self {
            downloader,
            platform,
            runtime_dir,
            downloads_dir,
            bundled_manifest: None,
            manifest_url: RUNTIME_MANIFEST_URL.to_string(),
            arch: platform_arch().to_string(),
            required_version: RUNTIME_VERSION.to_string(),
        }
    }

    pub fn with_bundled_manifest(mut self, path: Option<PathBuf>) -> Self {
        self.bundled_manifest = path;
        self
    }

    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// `bin/java` under the runtime dir (the shim on POSIX).
    pub fn java_binary(&self) -> PathBuf {
        self.runtime_dir
            .join("bin")
            .join(self.platform.runtime_binary_name())
    }

    fn marker_path(&self) -> PathBuf {
        self.runtime_dir.join(VERSION_MARKER)
    }

    /// Marker matches the pinned version and a runnable binary is present.
    pub fn is_installed(&self) -> bool {
        let marker = std::fs::read_to_string(self.marker_path()).unwrap_or_default();
        marker.trim() == self.required_version && shim::effective_binary(&self.java_binary()).is_some()
    }

    /// Make sure the pinned runtime is installed and return the binary to
    /// launch with.
    ///
    /// Download progress maps onto 0–80 of the preparing stage, extraction
    /// and shim installation fill the rest.
    #[instrument(skip(self, progress, cancel))]
    pub async fn ensure_runtime_installed(
        &self,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> LauncherResult<PathBuf> {
        if self.is_installed() {
            debug!("Runtime {} already installed", self.required_version);
            return Ok(self.java_binary());
        }

        info!("Installing runtime {} into {:?}", self.required_version, self.runtime_dir);
        if self.runtime_dir.exists() {
            tokio::fs::remove_dir_all(&self.runtime_dir)
                .await
                .map_err(|source| LauncherError::io(&self.runtime_dir, source))?;
        }

        let os = self.platform.os_name();
        let ext = self.platform.runtime_archive_ext();
        let (download, source) = resolve_download(
            self.downloader.client(),
            &self.manifest_url,
            self.bundled_manifest.as_deref(),
            os,
            &self.arch,
            ext,
        )
        .await;
        if source == ManifestSource::Fallback {
            warn!("Runtime checksum unknown, using {}", download.url);
        }

        let archive = self
            .downloads_dir
            .join(format!("jre-{}-{}-{}.{}", self.required_version, os, self.arch, ext));
        let download_start = Instant::now();
        let mut scaled = progress.scaled(LaunchStage::Preparing, 0, 80, "launch.runtime.download");
        self.downloader
            .download_file(
                &download.url,
                &archive,
                download.sha256.as_deref(),
                Some(cancel),
                |downloaded, total| scaled.report_bytes(downloaded, total),
            )
            .await?;
        info!("Runtime download finished in {:?}", download_start.elapsed());

        progress.progress(LaunchStage::Preparing, 85, "launch.runtime.extract", &[]);
        let staging = self.runtime_dir.clone();
        let archive_for_extract = archive.clone();
        let platform = self.platform.clone();
        tokio::task::spawn_blocking(move || -> LauncherResult<()> {
            extract::extract_archive(&archive_for_extract, &staging)?;
            platform.post_extract_normalize(&staging)?;
            Ok(())
        })
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))??;

        let java = self.java_binary();
        if !java.is_file() {
            return Err(RuntimeError::InvalidRuntime(format!(
                "no {} in extracted runtime",
                java.display()
            ))
            .into());
        }
        ensure_executable(&java)?;

        progress.progress(LaunchStage::Preparing, 95, "launch.runtime.shim", &[]);
        if cfg!(unix) {
            shim::install_shim(&java)?;
        }

        tokio::fs::write(self.marker_path(), &self.required_version)
            .await
            .map_err(|source| LauncherError::io(self.marker_path(), source))?;
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            debug!("Could not remove {:?}: {}", archive, e);
        }

        progress.progress(LaunchStage::Preparing, 100, "launch.runtime.ready", &[]);
        info!("Runtime {} ready at {:?}", self.required_version, java);
        Ok(java)
    }
}

pub(crate) fn ensure_executable(binary: &Path) -> LauncherResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(binary)
            .map_err(|source| LauncherError::io(binary, source))?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(binary, perms).map_err(|source| LauncherError::io(binary, source))?;
    }
    #[cfg(not(unix))]
    let _ = binary;
    Ok(())
}

pub(crate) mod extract {
    use super::*;

    /// Unpack `archive` into `root` as-is; layout fixes happen afterwards.
    pub fn extract_archive(archive: &Path, root: &Path) -> Result<(), RuntimeError> {
        std::fs::create_dir_all(root).map_err(|source| RuntimeError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            extract_zip(archive, root)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            extract_tar_gz(archive, root)
        } else {
            Err(RuntimeError::UnsupportedArchive(name))
        }
    }

    fn extract_zip(archive: &Path, root: &Path) -> Result<(), RuntimeError> {
        let file = std::fs::File::open(archive).map_err(|source| RuntimeError::Io {
            path: archive.to_path_buf(),
            source,
        })?;
        let mut zip = zip::ZipArchive::new(file)?;

        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(RuntimeError::InvalidRuntime(format!(
                    "unsafe zip entry {}",
                    entry.name()
                )));
            };
            let out_path = root.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path).map_err(|source| RuntimeError::Io {
                    path: out_path,
                    source,
                })?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| RuntimeError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let mut out = std::fs::File::create(&out_path).map_err(|source| RuntimeError::Io {
                path: out_path.clone(),
                source,
            })?;
            std::io::copy(&mut entry, &mut out).map_err(|source| RuntimeError::Io {
                path: out_path.clone(),
                source,
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
                }
            }
        }
        Ok(())
    }

    fn extract_tar_gz(archive: &Path, root: &Path) -> Result<(), RuntimeError> {
        let file = std::fs::File::open(archive).map_err(|source| RuntimeError::Io {
            path: archive.to_path_buf(),
            source,
        })?;
        let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
        tar.set_preserve_permissions(true);

        let entries = tar.entries().map_err(|source| RuntimeError::Io {
            path: archive.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let mut entry = entry.map_err(|source| RuntimeError::Io {
                path: archive.to_path_buf(),
                source,
            })?;
            let relative = entry
                .path()
                .map_err(|source| RuntimeError::Io {
                    path: archive.to_path_buf(),
                    source,
                })?
                .into_owned();
            if relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
            {
                return Err(RuntimeError::InvalidRuntime(format!(
                    "unsafe tar entry {}",
                    relative.display()
                )));
            }
            // `unpack_in` re-checks containment and creates parents.
            entry.unpack_in(root).map_err(|source| RuntimeError::Io {
                path: root.join(&relative),
                source,
            })?;
        }
        Ok(())
    }
}
