use std::sync::Arc;

use reqwest::Client;
use tracing::{info, warn};

use crate::core::auth::HttpAuthService;
use crate::core::config::{AppPaths, ConfigStore};
use crate::core::downloader::Downloader;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::build_http_client;
use crate::core::install::ButlerInstaller;
use crate::core::instance::InstanceStore;
use crate::core::java::RuntimeProvisioner;
use crate::core::launch::{current_platform, platform_arch, SessionOrchestrator, SkinBackupHooks};
use crate::core::patch::{DomainPatcher, OFFICIAL_DOMAIN};
use crate::core::redist::RedistProvisioner;
use crate::core::version::{VersionCatalog, DEFAULT_PATCH_HOST};

/// Wiring of every launcher service over one data directory.
pub struct AppState {
    pub paths: AppPaths,
    pub config: Arc<ConfigStore>,
    pub http_client: Client,
    pub downloader: Downloader,
    pub store: Arc<InstanceStore>,
    pub catalog: Arc<VersionCatalog>,
    pub session: Arc<SessionOrchestrator>,
}

impl AppState {
    pub fn new(paths: AppPaths) -> LauncherResult<Self> {
        std::fs::create_dir_all(paths.app_dir())
            .map_err(|source| LauncherError::io(paths.app_dir(), source))?;

        let config = Arc::new(ConfigStore::load(paths.config_file()));
        let snapshot = config.snapshot();
        let http_client = build_http_client()?;
        let downloader = Downloader::new(http_client.clone());
        let platform = current_platform();
        let os = platform.os_name();
        let arch = platform_arch();

        let store = Arc::new(InstanceStore::new(paths.clone(), config.clone(), platform.clone()));

        let patch_host = snapshot
            .patch_domain
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .unwrap_or(DEFAULT_PATCH_HOST);
        let catalog = Arc::new(VersionCatalog::new(
            http_client.clone(),
            patch_host,
            paths.version_cache_file(),
            os,
            arch,
        ));

        let installer = Arc::new(ButlerInstaller::new(
            downloader.clone(),
            catalog.clone(),
            paths.butler_dir(),
            paths.downloads_dir(),
            os,
            arch,
        ));
        let runtime = Arc::new(
            RuntimeProvisioner::new(
                downloader.clone(),
                platform.clone(),
                paths.runtime_dir(),
                paths.downloads_dir(),
            )
            .with_bundled_manifest(paths.bundled_runtime_manifest()),
        );
        let redist = Arc::new(RedistProvisioner::new(
            downloader.clone(),
            paths.app_dir().to_path_buf(),
            paths.downloads_dir(),
        ));
        let auth = Arc::new(HttpAuthService::new(http_client.clone()));

        let mut session = SessionOrchestrator::new(store.clone(), installer, runtime, redist, auth)
            .with_hooks(Arc::new(SkinBackupHooks::new(paths.skins_backup_dir())));
        if let Some(domain) = snapshot.active_auth_domain() {
            match DomainPatcher::new(OFFICIAL_DOMAIN, domain) {
                Ok(patcher) => session = session.with_patcher(Arc::new(patcher)),
                Err(e) => warn!("Binary patching disabled: {}", e),
            }
        }

        info!("Launcher data at {:?} ({} {})", paths.app_dir(), os, arch);
        Ok(Self {
            paths,
            config,
            http_client,
            downloader,
            store,
            catalog,
            session: Arc::new(session),
        })
    }

    pub fn from_environment() -> LauncherResult<Self> {
        Self::new(AppPaths::from_environment()?)
    }
}
