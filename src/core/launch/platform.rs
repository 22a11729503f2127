// ─── Platform strategies ───
// Everything that differs between Windows, Linux and macOS lives behind
// `PlatformStrategy`: executable locations, runtime archive layout and how the
// game process is started.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};

pub const PRODUCT_NAME: &str = "Hytale";
const CLIENT_DIR: &str = "Client";
const SERVER_JAR: &str = "Server/HytaleServer.jar";
const DEFAULT_UNIX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Inputs for building the game command.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub args: Vec<String>,
    /// Directory for the disposable launch script (Unix only).
    pub script_dir: PathBuf,
}

/// A ready-to-spawn command plus the script file to delete once the game
/// exits.
#[derive(Debug)]
pub struct PreparedCommand {
    pub command: tokio::process::Command,
    pub script: Option<PathBuf>,
}

pub trait PlatformStrategy: Send + Sync + std::fmt::Debug {
    /// OS segment used by the patch server and runtime manifest.
    fn os_name(&self) -> &'static str;

    fn client_executable_rel(&self) -> PathBuf;

    fn runtime_binary_name(&self) -> &'static str {
        "java"
    }

    fn runtime_archive_ext(&self) -> &'static str {
        "tar.gz"
    }

    /// Process names that may belong to a running game.
    fn orphan_process_names(&self) -> Vec<&'static str>;

    fn resolve_executable_path(&self, instance_dir: &Path) -> PathBuf {
        instance_dir.join(self.client_executable_rel())
    }

    fn working_directory(&self, instance_dir: &Path) -> PathBuf {
        instance_dir.join(CLIENT_DIR)
    }

    fn server_artifact_path(&self, instance_dir: &Path) -> PathBuf {
        instance_dir.join(SERVER_JAR)
    }

    /// Application bundle that must stay signed, if the platform has one.
    fn bundle_root(&self, _instance_dir: &Path) -> Option<PathBuf> {
        None
    }

    /// Fix up a freshly extracted runtime so that `bin/<java>` sits directly
    /// under `root`.
    fn post_extract_normalize(&self, root: &Path) -> LauncherResult<()> {
        flatten_single_wrapper(root)
    }

    fn build_launch_command(&self, spec: &LaunchSpec) -> LauncherResult<PreparedCommand>;

    /// Called before any bytes of the bundle are touched.
    fn prepare_bundle(&self, _instance_dir: &Path) -> LauncherResult<()> {
        Ok(())
    }

    /// Called after patching changed bytes inside the bundle.
    fn resign_bundle(&self, _instance_dir: &Path) -> LauncherResult<()> {
        Ok(())
    }
}

pub fn current_platform() -> Arc<dyn PlatformStrategy> {
    if cfg!(target_os = "windows") {
        Arc::new(WindowsPlatform)
    } else if cfg!(target_os = "macos") {
        Arc::new(MacPlatform)
    } else {
        Arc::new(LinuxPlatform)
    }
}

/// Architecture segment used by the patch server and runtime manifest.
pub fn platform_arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        _ => "amd64",
    }
}

// ── Windows ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsPlatform;

impl PlatformStrategy for WindowsPlatform {
    fn os_name(&self) -> &'static str {
        "windows"
    }

    fn client_executable_rel(&self) -> PathBuf {
        Path::new(CLIENT_DIR).join("HytaleClient.exe")
    }

    fn runtime_binary_name(&self) -> &'static str {
        "java.exe"
    }

    fn runtime_archive_ext(&self) -> &'static str {
        "zip"
    }

    fn orphan_process_names(&self) -> Vec<&'static str> {
        vec!["java.exe", "javaw.exe", "HytaleClient.exe"]
    }

    fn build_launch_command(&self, spec: &LaunchSpec) -> LauncherResult<PreparedCommand> {
        let mut command = tokio::process::Command::new(&spec.executable);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        // Terminal-related vars make some engines treat the process as a
        // virtual terminal session.
        command.env_remove("WT_SESSION");
        command.env_remove("TERM");
        command.env_remove("ConEmuANSI");

        Ok(PreparedCommand {
            command,
            script: None,
        })
    }
}

// ── Linux ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxPlatform;

impl PlatformStrategy for LinuxPlatform {
    fn os_name(&self) -> &'static str {
        "linux"
    }

    fn client_executable_rel(&self) -> PathBuf {
        Path::new(CLIENT_DIR).join("HytaleClient")
    }

    fn orphan_process_names(&self) -> Vec<&'static str> {
        vec!["java", "java.real", "HytaleClient"]
    }

    fn build_launch_command(&self, spec: &LaunchSpec) -> LauncherResult<PreparedCommand> {
        build_unix_script_command(spec)
    }
}

// ── macOS ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct MacPlatform;

impl MacPlatform {
    fn app_bundle(instance_dir: &Path) -> PathBuf {
        instance_dir.join(CLIENT_DIR).join("Hytale.app")
    }
}

impl PlatformStrategy for MacPlatform {
    fn os_name(&self) -> &'static str {
        "darwin"
    }

    fn client_executable_rel(&self) -> PathBuf {
        Path::new(CLIENT_DIR)
            .join("Hytale.app")
            .join("Contents")
            .join("MacOS")
            .join("HytaleClient")
    }

    fn orphan_process_names(&self) -> Vec<&'static str> {
        vec!["java", "java.real", "HytaleClient"]
    }

    fn bundle_root(&self, instance_dir: &Path) -> Option<PathBuf> {
        Some(Self::app_bundle(instance_dir))
    }

    fn post_extract_normalize(&self, root: &Path) -> LauncherResult<()> {
        flatten_single_wrapper(root)?;
        let home = root.join("Contents").join("Home");
        if home.join("bin").is_dir() {
            lift_contents(&home, root)?;
        }
        Ok(())
    }

    fn build_launch_command(&self, spec: &LaunchSpec) -> LauncherResult<PreparedCommand> {
        build_unix_script_command(spec)
    }

    fn prepare_bundle(&self, instance_dir: &Path) -> LauncherResult<()> {
        let bundle = Self::app_bundle(instance_dir);
        if !bundle.exists() {
            return Ok(());
        }
        // Quarantine flags make the re-signed bundle unlaunchable.
        run_tool("xattr", &["-cr"], &bundle)
    }

    fn resign_bundle(&self, instance_dir: &Path) -> LauncherResult<()> {
        let bundle = Self::app_bundle(instance_dir);
        if !bundle.exists() {
            return Ok(());
        }
        run_tool("codesign", &["--force", "--deep", "--sign", "-"], &bundle)
    }
}

fn run_tool(program: &str, args: &[&str], target: &Path) -> LauncherResult<()> {
    let status = std::process::Command::new(program)
        .args(args)
        .arg(target)
        .status()
        .map_err(|source| LauncherError::io(target, source))?;
    if !status.success() {
        return Err(LauncherError::Other(format!(
            "{program} exited with {status} for {}",
            target.display()
        )));
    }
    Ok(())
}

// ── Unix launch script ──────────────────────────────────

/// Environment handed to the game after `env -i` wiped the host one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimalEnv {
    pub vars: Vec<(String, String)>,
}

impl MinimalEnv {
    /// Minimal set taken from the host with fallbacks. Display session
    /// variables are forwarded when present, the game cannot open a window
    /// without them.
    pub fn from_host(working_dir: &Path) -> Self {
        let host = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let home = host("HOME").unwrap_or_else(|| "/tmp".to_string());
        let user = host("USER")
            .or_else(|| host("LOGNAME"))
            .unwrap_or_else(|| "player".to_string());

        let mut vars = vec![
            ("HOME".to_string(), home),
            ("USER".to_string(), user),
            (
                "PATH".to_string(),
                host("PATH").unwrap_or_else(|| DEFAULT_UNIX_PATH.to_string()),
            ),
            (
                "SHELL".to_string(),
                host("SHELL").unwrap_or_else(|| "/bin/sh".to_string()),
            ),
            (
                "TMPDIR".to_string(),
                host("TMPDIR").unwrap_or_else(|| "/tmp".to_string()),
            ),
            (
                "LD_LIBRARY_PATH".to_string(),
                prepend_path(&working_dir.to_string_lossy(), host("LD_LIBRARY_PATH")),
            ),
        ];

        for passthrough in ["DISPLAY", "WAYLAND_DISPLAY", "XDG_RUNTIME_DIR", "XAUTHORITY"] {
            if let Some(value) = host(passthrough) {
                vars.push((passthrough.to_string(), value));
            }
        }

        Self { vars }
    }
}

fn prepend_path(value: &str, existing: Option<String>) -> String {
    match existing {
        Some(existing) if !existing.trim().is_empty() => format!("{value}:{existing}"),
        _ => value.to_string(),
    }
}

/// Shell script that resets the environment and `exec`s the client.
pub fn render_unix_launch_script(spec: &LaunchSpec, env: &MinimalEnv) -> String {
    let mut script = String::from("#!/bin/sh\n");
    script.push_str("# Generated by HyPrism. Removed when the game exits.\n");
    script.push_str(&format!(
        "cd {} || exit 1\n",
        shell_quote(&spec.working_dir.to_string_lossy())
    ));
    script.push_str("exec env -i \\\n");
    for (name, value) in &env.vars {
        script.push_str(&format!("  {}={} \\\n", name, shell_quote(value)));
    }
    script.push_str(&format!(
        "  {}",
        shell_quote(&spec.executable.to_string_lossy())
    ));
    for arg in &spec.args {
        script.push_str(" \\\n    ");
        script.push_str(&shell_quote(arg));
    }
    script.push('\n');
    script
}

fn build_unix_script_command(spec: &LaunchSpec) -> LauncherResult<PreparedCommand> {
    std::fs::create_dir_all(&spec.script_dir)
        .map_err(|source| LauncherError::io(&spec.script_dir, source))?;

    let script_path = spec
        .script_dir
        .join(format!("launch-{}.sh", uuid::Uuid::new_v4()));
    let body = render_unix_launch_script(spec, &MinimalEnv::from_host(&spec.working_dir));
    std::fs::write(&script_path, body).map_err(|source| LauncherError::io(&script_path, source))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
            .map_err(|source| LauncherError::io(&script_path, source))?;
    }

    debug!("Wrote launch script {:?}", script_path);

    let mut command = tokio::process::Command::new("/bin/sh");
    command
        .arg(&script_path)
        .current_dir(&spec.working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    Ok(PreparedCommand {
        command,
        script: Some(script_path),
    })
}

pub fn shell_quote(raw: &str) -> String {
    if !raw.is_empty()
        && raw
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '='))
    {
        return raw.to_string();
    }
    format!("'{}'", raw.replace('\'', r"'\''"))
}

// ── Archive layout ──────────────────────────────────────

/// When `root` holds exactly one directory, move its contents up a level.
pub fn flatten_single_wrapper(root: &Path) -> LauncherResult<()> {
    let entries: Vec<_> = std::fs::read_dir(root)
        .map_err(|source| LauncherError::io(root, source))?
        .filter_map(Result::ok)
        .collect();

    if entries.len() != 1 {
        return Ok(());
    }
    let wrapper = entries[0].path();
    if !wrapper.is_dir() {
        return Ok(());
    }

    // Renamed first so an inner entry sharing the wrapper's name can't collide.
    let staging = root.join(format!(".unwrap-{}", uuid::Uuid::new_v4()));
    std::fs::rename(&wrapper, &staging).map_err(|source| LauncherError::io(&wrapper, source))?;
    lift_contents(&staging, root)?;
    if let Err(e) = std::fs::remove_dir(&staging) {
        warn!("Could not remove {:?}: {}", staging, e);
    }
    Ok(())
}

fn lift_contents(from: &Path, to: &Path) -> LauncherResult<()> {
    for entry in std::fs::read_dir(from).map_err(|source| LauncherError::io(from, source))? {
        let entry = entry.map_err(|source| LauncherError::io(from, source))?;
        let target = to.join(entry.file_name());
        if target.exists() {
            continue;
        }
        std::fs::rename(entry.path(), &target).map_err(|source| LauncherError::io(&target, source))?;
    }
    Ok(())
}
