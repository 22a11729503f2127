// ─── Launch session ───
// Drives one launch through preparing → patching → authenticating →
// launching → waiting-for-ready and owns the cleanup that runs when the
// game exits. Only one launch may be in flight per orchestrator.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::auth::{AuthService, LaunchIdentity};
use crate::core::config::{Config, DEFAULT_NICK};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::install::{GameInstaller, InstallRequest};
use crate::core::instance::InstanceStore;
use crate::core::java::RuntimeProvisioner;
use crate::core::patch::{patch_file, ClientPatcher, NoopPatcher, PatchBufferPool, PatchTarget};
use crate::core::process::{ExitCallback, GameExit, GameProcess, ProcessTracker};
use crate::core::progress::{LaunchEvent, LaunchStage, ProgressSink};
use crate::core::redist::{RedistOutcome, RedistProvisioner};

use super::args::{build_game_args, redacted};
use super::hooks::{GameSession, NoopHooks, SessionHooks};
use super::platform::{LaunchSpec, PlatformStrategy, PRODUCT_NAME};
use super::readiness;

pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaunchOutcome {
    /// The client printed its ready marker.
    Ready { pid: u32 },
    /// Started, but no ready marker before the timeout.
    Unconfirmed { pid: u32 },
    /// Started; the caller stopped waiting. The game keeps running.
    Detached { pid: u32 },
    Cancelled,
}

/// Held for the duration of a launch; released on drop.
#[derive(Debug)]
pub struct LaunchGuard {
    flag: Arc<AtomicBool>,
}

impl LaunchGuard {
    pub fn acquire(flag: &Arc<AtomicBool>) -> LauncherResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| LauncherError::LaunchInProgress)?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for LaunchGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn checkpoint(cancel: &CancellationToken, stage: LaunchStage) -> LauncherResult<()> {
    if stage.is_cancellable() && cancel.is_cancelled() {
        return Err(LauncherError::Cancelled);
    }
    Ok(())
}

async fn remove_script(script: Option<&Path>) {
    if let Some(script) = script {
        if let Err(e) = tokio::fs::remove_file(script).await {
            debug!("Launch script {:?} not removed: {}", script, e);
        }
    }
}

pub struct SessionOrchestrator {
    store: Arc<InstanceStore>,
    installer: Arc<dyn GameInstaller>,
    runtime: Arc<RuntimeProvisioner>,
    redist: Arc<RedistProvisioner>,
    auth: Arc<dyn AuthService>,
    patcher: Arc<dyn ClientPatcher>,
    patch_pool: Arc<PatchBufferPool>,
    hooks: Arc<dyn SessionHooks>,
    tracker: ProcessTracker,
    launching: Arc<AtomicBool>,
    ready_timeout: Duration,
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<InstanceStore>,
        installer: Arc<dyn GameInstaller>,
        runtime: Arc<RuntimeProvisioner>,
        redist: Arc<RedistProvisioner>,
        auth: Arc<dyn AuthService>,
    ) -> Self {
        Self {
            store,
            installer,
            runtime,
            redist,
            auth,
            patcher: Arc::new(NoopPatcher),
            patch_pool: Arc::new(PatchBufferPool::default()),
            hooks: Arc::new(NoopHooks),
            tracker: ProcessTracker::new(),
            launching: Arc::new(AtomicBool::new(false)),
            ready_timeout: READY_TIMEOUT,
        }
    }

    pub fn with_patcher(mut self, patcher: Arc<dyn ClientPatcher>) -> Self {
        self.patcher = patcher;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.store
    }

    pub fn is_launching(&self) -> bool {
        self.launching.load(Ordering::SeqCst)
    }

    pub fn is_game_running(&self) -> bool {
        self.tracker.is_running()
    }

    /// Kill the running game. Cleanup follows through the exit path.
    pub fn force_close(&self) -> LauncherResult<bool> {
        self.tracker.kill()
    }

    /// Adopt a game left running by an earlier launcher process.
    pub fn recover_orphan(&self, progress: &ProgressSink) -> LauncherResult<Option<u32>> {
        let names = self.store.platform().orphan_process_names();
        let session = GameSession {
            nick: self.store.config().snapshot().nick,
            uuid: None,
            instance_dir: None,
        };
        self.tracker.scan_for_orphan(
            &names,
            PRODUCT_NAME,
            self.exit_callback(session, None, progress.clone()),
        )
    }

    /// Run a full launch. Cancellation before the process starts yields
    /// [`LaunchOutcome::Cancelled`]; after that it only ends the wait.
    #[instrument(skip_all)]
    pub async fn launch(
        &self,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> LauncherResult<LaunchOutcome> {
        let _guard = LaunchGuard::acquire(&self.launching)?;
        let mut stage = LaunchStage::Preparing;

        match self.run(&mut stage, progress, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(LauncherError::Cancelled) => {
                info!("Launch cancelled during {}", stage);
                progress.progress(LaunchStage::Cancelled, 100, "launch.cancelled", &[stage.as_str()]);
                progress.emit(LaunchEvent::Cancelled);
                Ok(LaunchOutcome::Cancelled)
            }
            Err(e) => {
                error!("Launch failed during {}: {}", stage, e);
                progress.progress(LaunchStage::Error, 100, "launch.failed", &[stage.as_str()]);
                progress.emit(LaunchEvent::Failed {
                    stage,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        stage: &mut LaunchStage,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> LauncherResult<LaunchOutcome> {
        // ── preparing ──
        progress.progress(LaunchStage::Preparing, 0, "launch.preparing", &[]);
        if let Some(pid) = self.tracker.pid() {
            return Err(LauncherError::AlreadyRunning(pid));
        }
        if let Some(pid) = self.recover_orphan(progress)? {
            return Err(LauncherError::AlreadyRunning(pid));
        }
        checkpoint(cancel, *stage)?;

        let config = self.store.config().snapshot();
        let branch = config.branch();
        let version = config.selected_version;
        let instance_dir = self.store.resolve_instance_path(branch, version)?;
        info!("Launching {} {} from {:?}", branch, version, instance_dir);

        let installed = self
            .installer
            .ensure_installed(InstallRequest {
                store: &self.store,
                branch,
                version,
                instance_dir: &instance_dir,
                progress,
                cancel,
            })
            .await?;
        debug!("Install step: {:?}", installed);
        checkpoint(cancel, *stage)?;

        let java = self.runtime.ensure_runtime_installed(progress, cancel).await?;
        checkpoint(cancel, *stage)?;

        match self.redist.ensure_redistributable(cancel).await {
            RedistOutcome::Failed(reason) => {
                warn!("Continuing without redistributable: {}", reason)
            }
            outcome => debug!("Redistributable: {:?}", outcome),
        }
        progress.progress(LaunchStage::Preparing, 100, "launch.prepared", &[]);

        // ── patching ──
        *stage = LaunchStage::Patching;
        checkpoint(cancel, *stage)?;
        let platform = self.store.platform().clone();
        let executable = platform.resolve_executable_path(&instance_dir);
        if !executable.is_file() {
            return Err(LauncherError::ExecutableMissing(executable));
        }
        progress.progress(LaunchStage::Patching, 0, "launch.patching", &[]);
        self.patch_artifacts(platform.as_ref(), &instance_dir, &executable, progress)
            .await;
        progress.progress(LaunchStage::Patching, 100, "launch.patched", &[]);

        // ── authenticating ──
        *stage = LaunchStage::Authenticating;
        checkpoint(cancel, *stage)?;
        let identity = self.resolve_identity(&config, progress).await?;

        // ── launching ──
        *stage = LaunchStage::Launching;
        checkpoint(cancel, *stage)?;
        progress.progress(LaunchStage::Launching, 0, "launch.launching", &[]);

        let user_dir = self.store.user_data_dir(&instance_dir);
        let args = build_game_args(&instance_dir, &user_dir, &java, &identity);
        debug!("Game arguments: {:?}", redacted(&args));
        let spec = LaunchSpec {
            executable,
            working_dir: platform.working_directory(&instance_dir),
            args,
            script_dir: self.store.paths().launch_scripts_dir(),
        };
        let mut prepared = platform.build_launch_command(&spec)?;

        let session = GameSession {
            nick: identity.name.clone(),
            uuid: Some(identity.uuid),
            instance_dir: Some(instance_dir.clone()),
        };
        if let Err(e) = self.hooks.on_started(&session).await {
            warn!("Session start hook failed: {}", e);
        }

        if let Err(e) = checkpoint(cancel, *stage) {
            remove_script(prepared.script.as_deref()).await;
            return Err(e);
        }
        let mut child = match prepared.command.spawn() {
            Ok(child) => child,
            Err(e) => {
                remove_script(prepared.script.as_deref()).await;
                return Err(LauncherError::Spawn(e.to_string()));
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pid = self.tracker.set_game_process(
            GameProcess::Child(child),
            self.exit_callback(session, prepared.script.take(), progress.clone()),
        )?;
        progress.emit(LaunchEvent::Started { pid });
        progress.progress(LaunchStage::Launching, 100, "launch.started", &[pid.to_string().as_str()]);

        // ── waiting-for-ready ──
        *stage = LaunchStage::WaitingForReady;
        progress.progress(LaunchStage::WaitingForReady, 0, "launch.waiting", &[]);
        let ready = readiness::watch_output(stdout, stderr, pid);

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.ready_timeout, ready) => match result {
                Ok(Ok(())) => {
                    info!("Game PID {} is ready", pid);
                    progress.emit(LaunchEvent::Ready { pid });
                    LaunchOutcome::Ready { pid }
                }
                Ok(Err(_)) => {
                    warn!("Game PID {} closed its output without a ready signal", pid);
                    progress.emit(LaunchEvent::ReadyTimeout { pid });
                    LaunchOutcome::Unconfirmed { pid }
                }
                Err(_) => {
                    warn!("No ready signal from PID {} within {:?}", pid, self.ready_timeout);
                    progress.emit(LaunchEvent::ReadyTimeout { pid });
                    LaunchOutcome::Unconfirmed { pid }
                }
            },
            _ = cancel.cancelled() => {
                info!("Stopped waiting for PID {}, the game keeps running", pid);
                LaunchOutcome::Detached { pid }
            }
        };

        *stage = LaunchStage::Complete;
        progress.progress(LaunchStage::Complete, 100, "launch.complete", &[]);
        Ok(outcome)
    }

    async fn patch_artifacts(
        &self,
        platform: &dyn PlatformStrategy,
        instance_dir: &Path,
        executable: &Path,
        progress: &ProgressSink,
    ) {
        // Quarantine flags make codesign fail after the bytes change.
        if let Err(e) = platform.prepare_bundle(instance_dir) {
            warn!("Could not prepare app bundle: {}", e);
        }

        let targets = [
            (PatchTarget::Client, executable.to_path_buf()),
            (PatchTarget::Server, platform.server_artifact_path(instance_dir)),
        ];
        let mut changed = false;
        for (index, (target, path)) in targets.iter().enumerate() {
            match patch_file(self.patcher.as_ref(), &self.patch_pool, *target, path).await {
                Ok(patched) => changed |= patched,
                Err(e) => warn!("Patching {:?} failed, launching unpatched: {}", target, e),
            }
            let name = format!("{target:?}").to_lowercase();
            progress.progress(
                LaunchStage::Patching,
                ((index + 1) * 45) as u8,
                "launch.patching.target",
                &[name.as_str()],
            );
        }

        if changed {
            if let Err(e) = platform.resign_bundle(instance_dir) {
                warn!("Could not re-sign app bundle: {}", e);
            }
        }
    }

    async fn resolve_identity(&self, config: &Config, progress: &ProgressSink) -> LauncherResult<LaunchIdentity> {
        let nick = match config.nick.trim() {
            "" => DEFAULT_NICK.to_string(),
            nick => nick.to_string(),
        };
        let (uuid, created) = self.store.config().update(|c| c.uuid_for_user(&nick))?;
        if created {
            info!("Assigned UUID {} to {}", uuid, nick);
        }
        let mut identity = LaunchIdentity::offline(&nick, uuid);

        let Some(domain) = config.active_auth_domain() else {
            progress.progress(LaunchStage::Authenticating, 100, "launch.auth.offline", &[]);
            return Ok(identity);
        };

        progress.progress(LaunchStage::Authenticating, 0, "launch.auth.request", &[domain]);
        match self.auth.create_session(domain, &nick, uuid).await {
            Ok(tokens) => {
                identity.tokens = Some(tokens);
                progress.progress(LaunchStage::Authenticating, 100, "launch.auth.ok", &[domain]);
            }
            Err(e) => {
                warn!("Authentication against {} failed, launching offline: {}", domain, e);
                progress.progress(
                    LaunchStage::Authenticating,
                    100,
                    "launch.auth.offline_fallback",
                    &[domain],
                );
            }
        }
        Ok(identity)
    }

    fn exit_callback(&self, session: GameSession, script: Option<PathBuf>, progress: ProgressSink) -> ExitCallback {
        let hooks = self.hooks.clone();
        Box::new(move |exit: GameExit| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                hooks.stop_skin_protection(&session).await;
                if let Err(e) = hooks.backup_skin(&session).await {
                    warn!("Skin backup failed: {}", e);
                }
                hooks.reset_presence(&session).await;
                remove_script(script.as_deref()).await;
                progress.emit(LaunchEvent::Stopped {
                    pid: exit.pid,
                    exit_code: exit.exit_code,
                });
            })
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use reqwest::Client;
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    use super::*;
    use crate::core::auth::SessionTokens;
    use crate::core::config::{AppPaths, ConfigStore};
    use crate::core::downloader::Downloader;
    use crate::core::install::InstallOutcome;
    use crate::core::java::VERSION_MARKER;
    use crate::core::java::RUNTIME_VERSION;
    use crate::core::launch::platform::{LinuxPlatform, PreparedCommand};

    /// Linux behaviour with orphan scanning pointed at a name nothing uses,
    /// so parallel tests never adopt each other's games.
    #[derive(Debug)]
    struct IsolatedLinux;

    impl PlatformStrategy for IsolatedLinux {
        fn os_name(&self) -> &'static str {
            LinuxPlatform.os_name()
        }

        fn client_executable_rel(&self) -> PathBuf {
            LinuxPlatform.client_executable_rel()
        }

        fn orphan_process_names(&self) -> Vec<&'static str> {
            vec!["hyprism-test-no-such-process"]
        }

        fn build_launch_command(&self, spec: &LaunchSpec) -> LauncherResult<PreparedCommand> {
            LinuxPlatform.build_launch_command(spec)
        }
    }

    #[derive(Default)]
    struct CountingInstaller {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GameInstaller for CountingInstaller {
        async fn ensure_installed(&self, request: InstallRequest<'_>) -> LauncherResult<InstallOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(InstallOutcome::AlreadyCurrent {
                version: request.version,
            })
        }
    }

    struct FailingAuth;

    #[async_trait]
    impl AuthService for FailingAuth {
        async fn create_session(&self, _: &str, _: &str, _: Uuid) -> LauncherResult<SessionTokens> {
            Err(LauncherError::Auth("offline for tests".into()))
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        paths: AppPaths,
        installer: Arc<CountingInstaller>,
        orchestrator: SessionOrchestrator,
    }

    fn fixture(client_script: Option<&str>, config: Config) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(tmp.path());
        let platform: Arc<dyn PlatformStrategy> = Arc::new(IsolatedLinux);
        let store = Arc::new(
            InstanceStore::new(
                paths.clone(),
                Arc::new(ConfigStore::in_memory(paths.config_file(), config)),
                platform.clone(),
            )
            .with_legacy_roots(Vec::new()),
        );

        if let Some(body) = client_script {
            let client = store.latest_path(store.config().snapshot().branch()).unwrap().join("Client/HytaleClient");
            std::fs::create_dir_all(client.parent().unwrap()).unwrap();
            std::fs::write(&client, body).unwrap();
            crate::core::java::runtime::ensure_executable(&client).unwrap();
        }

        let runtime_dir = paths.runtime_dir();
        std::fs::create_dir_all(runtime_dir.join("bin")).unwrap();
        std::fs::write(runtime_dir.join("bin/java"), "#!/bin/sh\n").unwrap();
        std::fs::write(runtime_dir.join(VERSION_MARKER), RUNTIME_VERSION).unwrap();

        let downloader = Downloader::new(Client::new());
        let runtime = RuntimeProvisioner::new(
            downloader.clone(),
            platform,
            runtime_dir,
            paths.downloads_dir(),
        );
        let redist = RedistProvisioner::new(
            downloader,
            paths.app_dir().to_path_buf(),
            paths.downloads_dir(),
        );
        let installer = Arc::new(CountingInstaller::default());
        let orchestrator = SessionOrchestrator::new(
            store,
            installer.clone(),
            Arc::new(runtime),
            Arc::new(redist),
            Arc::new(FailingAuth),
        );

        Fixture {
            _tmp: tmp,
            paths,
            installer,
            orchestrator,
        }
    }

    async fn wait_for_stop(rx: &mut UnboundedReceiver<LaunchEvent>, seen: &mut Vec<LaunchEvent>) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = rx.recv().await {
                let stopped = matches!(event, LaunchEvent::Stopped { .. });
                seen.push(event);
                if stopped {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }

    const READY_CLIENT: &str = "#!/bin/sh\n\
        echo 'System Information'\n\
        echo '  GPU: test adapter'\n\
        echo ''\n\
        echo 'Interface loaded'\n\
        sleep 0.3\n";

    #[tokio::test]
    async fn launch_reports_ready_then_cleans_up_once() {
        let config = Config {
            nick: "Steve".into(),
            online_mode: true,
            auth_domain: Some("example.org".into()),
            ..Config::default()
        };
        let fx = fixture(Some(READY_CLIENT), config);
        let (progress, mut rx) = ProgressSink::channel();

        let outcome = fx
            .orchestrator
            .launch(&progress, &CancellationToken::new())
            .await
            .unwrap();
        let pid = match outcome {
            LaunchOutcome::Ready { pid } => pid,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert!(!fx.orchestrator.is_launching());

        let mut events = Vec::new();
        wait_for_stop(&mut rx, &mut events).await;

        assert!(events.contains(&LaunchEvent::Started { pid }));
        assert!(events.contains(&LaunchEvent::Ready { pid }));
        assert!(events.iter().any(|e| matches!(
            e,
            LaunchEvent::Progress { detail_key, .. } if detail_key == "launch.auth.offline_fallback"
        )));
        assert_eq!(
            events.iter().filter(|e| matches!(e, LaunchEvent::Stopped { .. })).count(),
            1
        );
        assert_eq!(
            events.last(),
            Some(&LaunchEvent::Stopped {
                pid,
                exit_code: Some(0)
            })
        );

        assert!(!fx.orchestrator.is_game_running());
        let scripts: Vec<_> = std::fs::read_dir(fx.paths.launch_scripts_dir())
            .unwrap()
            .collect();
        assert!(scripts.is_empty());

        let stored = fx.orchestrator.store().config().snapshot();
        assert!(stored.user_uuids.contains_key("Steve"));
        assert_eq!(fx.installer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn silent_client_is_unconfirmed_not_failed() {
        let fx = fixture(Some("#!/bin/sh\nsleep 1\n"), Config::default());
        let orchestrator = fx.orchestrator.with_ready_timeout(Duration::from_millis(200));
        let (progress, mut rx) = ProgressSink::channel();

        let outcome = orchestrator
            .launch(&progress, &CancellationToken::new())
            .await
            .unwrap();
        let LaunchOutcome::Unconfirmed { pid } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert!(orchestrator.is_game_running());

        let mut events = Vec::new();
        wait_for_stop(&mut rx, &mut events).await;
        assert!(events.contains(&LaunchEvent::ReadyTimeout { pid }));
    }

    #[tokio::test]
    async fn missing_executable_is_fatal() {
        let fx = fixture(None, Config::default());
        let (progress, mut rx) = ProgressSink::channel();

        let err = fx
            .orchestrator
            .launch(&progress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::ExecutableMissing(_)));

        drop(progress);
        let mut failed = None;
        while let Some(event) = rx.recv().await {
            if let LaunchEvent::Failed { stage, .. } = event {
                failed = Some(stage);
            }
        }
        assert_eq!(failed, Some(LaunchStage::Patching));
    }

    #[tokio::test]
    async fn cancelled_launch_is_an_outcome() {
        let fx = fixture(Some(READY_CLIENT), Config::default());
        let (progress, mut rx) = ProgressSink::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = fx.orchestrator.launch(&progress, &cancel).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Cancelled);
        assert_eq!(fx.installer.calls.load(Ordering::SeqCst), 0);
        assert!(!fx.orchestrator.is_game_running());

        drop(progress);
        let mut saw_cancelled = false;
        while let Some(event) = rx.recv().await {
            saw_cancelled |= event == LaunchEvent::Cancelled;
        }
        assert!(saw_cancelled);
    }

    #[test]
    fn launch_guard_admits_one_launch() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = LaunchGuard::acquire(&flag).unwrap();
        assert!(matches!(
            LaunchGuard::acquire(&flag),
            Err(LauncherError::LaunchInProgress)
        ));
        drop(first);
        assert!(LaunchGuard::acquire(&flag).is_ok());
    }
}
