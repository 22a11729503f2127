use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::{LauncherError, LauncherResult};

const ADOPTED_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Something the tracker can own.
#[derive(Debug)]
pub enum GameProcess {
    /// Spawned by this launcher; exit status is known.
    Child(tokio::process::Child),
    /// Found running after a launcher restart; only liveness can be polled.
    Adopted { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameExit {
    pub pid: u32,
    pub exit_code: Option<i32>,
}

pub type ExitCallback = Box<dyn FnOnce(GameExit) -> BoxFuture<'static, ()> + Send>;

#[derive(Debug)]
struct TrackedGame {
    pid: u32,
    generation: u64,
    exited: Arc<AtomicBool>,
    kill: CancellationToken,
    monitor: JoinHandle<()>,
}

/// Owns at most one game process and tells its owner, exactly once, when it
/// exits.
#[derive(Debug, Clone, Default)]
pub struct ProcessTracker {
    slot: Arc<Mutex<Option<TrackedGame>>>,
    generations: Arc<AtomicU64>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<TrackedGame>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the tracked process. The previous monitor is detached before
    /// its handle is dropped, so its exit callback can no longer fire. A
    /// previous process that already exited keeps running its cleanup.
    pub fn set_game_process(&self, process: GameProcess, on_exit: ExitCallback) -> LauncherResult<u32> {
        let pid = match &process {
            GameProcess::Child(child) => child
                .id()
                .ok_or_else(|| LauncherError::Spawn("process exited before it was tracked".into()))?,
            GameProcess::Adopted { pid } => *pid,
        };

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let exited = Arc::new(AtomicBool::new(false));
        let kill = CancellationToken::new();

        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            if !previous.exited.load(Ordering::SeqCst) {
                previous.monitor.abort();
                debug!("Stopped tracking PID {}", previous.pid);
            }
        }

        let monitor = tokio::spawn(monitor_process(
            process,
            pid,
            generation,
            exited.clone(),
            kill.clone(),
            self.slot.clone(),
            on_exit,
        ));

        *slot = Some(TrackedGame {
            pid,
            generation,
            exited,
            kill,
            monitor,
        });
        info!("Tracking game process PID {}", pid);
        Ok(pid)
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|game| !game.exited.load(Ordering::SeqCst))
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock()
            .as_ref()
            .filter(|game| !game.exited.load(Ordering::SeqCst))
            .map(|game| game.pid)
    }

    /// Terminate the tracked process. The exit callback still runs through
    /// the normal path. Returns `false` when nothing was running.
    pub fn kill(&self) -> LauncherResult<bool> {
        let (pid, token) = match self.lock().as_ref() {
            Some(game) if !game.exited.load(Ordering::SeqCst) => (game.pid, game.kill.clone()),
            _ => return Ok(false),
        };

        info!("Terminating game process PID {}", pid);
        token.cancel();
        Ok(true)
    }

    /// Look for a game left running by a previous launcher session and
    /// adopt the first match. No-op while something is already tracked.
    pub fn scan_for_orphan(
        &self,
        candidate_names: &[&str],
        product: &str,
        on_exit: ExitCallback,
    ) -> LauncherResult<Option<u32>> {
        if self.is_running() {
            return Ok(self.pid());
        }
        match find_orphan(candidate_names, product) {
            Some(pid) => {
                info!("Adopting running game process PID {}", pid);
                self.set_game_process(GameProcess::Adopted { pid }, on_exit)
                    .map(Some)
            }
            None => Ok(None),
        }
    }
}

async fn monitor_process(
    process: GameProcess,
    pid: u32,
    generation: u64,
    exited: Arc<AtomicBool>,
    kill: CancellationToken,
    slot: Arc<Mutex<Option<TrackedGame>>>,
    on_exit: ExitCallback,
) {
    let exit_code = match process {
        GameProcess::Child(mut child) => {
            tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()),
                _ = kill.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill PID {}: {}", pid, e);
                    }
                    child.wait().await.ok().and_then(|s| s.code())
                }
            }
        }
        GameProcess::Adopted { pid } => {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(ADOPTED_POLL_INTERVAL) => {}
                    _ = kill.cancelled() => {
                        kill_pid(pid);
                    }
                }
                if !pid_alive(pid) {
                    break;
                }
            }
            None
        }
    };

    exited.store(true, Ordering::SeqCst);
    {
        let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(|game| game.generation == generation) {
            *slot = None;
        }
    }

    info!("Game process PID {} exited with {:?}", pid, exit_code);
    on_exit(GameExit { pid, exit_code }).await;
}

/// Snapshot of a single process, refreshed without scanning the others.
fn single_process(pid: u32) -> (System, Pid) {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), ProcessRefreshKind::new());
    (system, pid)
}

/// Zombies count as gone: they only wait for their parent to reap them.
fn pid_alive(pid: u32) -> bool {
    let (system, pid) = single_process(pid);
    system
        .process(pid)
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

fn kill_pid(pid: u32) -> bool {
    let (system, pid) = single_process(pid);
    system.process(pid).is_some_and(|process| process.kill())
}

/// Whether a process looks like the game: its name is a candidate and its
/// executable path or command line mentions the product.
pub fn matches_game(
    name: &str,
    exe: Option<&Path>,
    cmdline: &str,
    candidate_names: &[&str],
    product: &str,
) -> bool {
    let name = name.to_ascii_lowercase();
    let name = name.strip_suffix(".exe").unwrap_or(&name);
    let is_candidate = candidate_names.iter().any(|candidate| {
        let candidate = candidate.to_ascii_lowercase();
        candidate.strip_suffix(".exe").unwrap_or(&candidate) == name
    });
    if !is_candidate {
        return false;
    }

    let product = product.to_ascii_lowercase();
    let exe_matches = exe
        .map(|exe| exe.to_string_lossy().to_ascii_lowercase().contains(&product))
        .unwrap_or(false);
    exe_matches || cmdline.to_ascii_lowercase().contains(&product)
}

/// First process matching [`matches_game`], never this launcher itself.
/// Processes that cannot be inspected are skipped.
pub fn find_orphan(candidate_names: &[&str], product: &str) -> Option<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::everything());
    let own_pid = std::process::id();

    let mut processes: Vec<_> = system.processes().values().collect();
    processes.sort_by_key(|process| process.pid().as_u32());

    processes.into_iter().find_map(|process| {
        let pid = process.pid().as_u32();
        if pid == own_pid {
            return None;
        }
        let name = process.name().to_string_lossy();
        let mut cmdline = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        if cmdline.is_empty() {
            cmdline = proc_cmdline(pid).unwrap_or_default();
        }

        matches_game(&name, process.exe(), &cmdline, candidate_names, product).then_some(pid)
    })
}

#[cfg(target_os = "linux")]
fn proc_cmdline(pid: u32) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    Some(
        raw.split(|byte| *byte == 0)
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[cfg(not(target_os = "linux"))]
fn proc_cmdline(_pid: u32) -> Option<String> {
    None
}
