// ─── Visual C++ redistributable ───
// The Windows client links against the MSVC runtime. Installing it is best
// effort: every failure is logged and the launch carries on.

use std::path::PathBuf;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::downloader::Downloader;
use crate::core::error::{LauncherError, LauncherResult};

pub const REDIST_URL: &str = "https://aka.ms/vs/17/release/vc_redist.x64.exe";
pub const REDIST_MARKER: &str = ".vc_redist_installed";
const REGISTRY_KEY: &str = r"HKLM\SOFTWARE\Microsoft\VisualStudio\14.0\VC\Runtimes\x64";

/// `1638`: a newer version is already installed. `3010`: reboot pending.
pub fn redist_exit_is_success(code: i32) -> bool {
    matches!(code, 0 | 1638 | 3010)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum RedistOutcome {
    NotRequired,
    AlreadyInstalled,
    Installed,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RedistProvisioner {
    downloader: Downloader,
    marker: PathBuf,
    downloads_dir: PathBuf,
    url: String,
}

impl RedistProvisioner {
    pub fn new(downloader: Downloader, app_dir: PathBuf, downloads_dir: PathBuf) -> Self {
        Self {
            downloader,
            marker: app_dir.join(REDIST_MARKER),
            downloads_dir,
            url: REDIST_URL.to_string(),
        }
    }

    /// Never fails; the outcome only feeds logging and progress.
    pub async fn ensure_redistributable(&self, cancel: &CancellationToken) -> RedistOutcome {
        if !cfg!(target_os = "windows") {
            return RedistOutcome::NotRequired;
        }
        if self.marker.exists() || registry_reports_installed().await {
            return RedistOutcome::AlreadyInstalled;
        }

        match self.install(cancel).await {
            Ok(code) if redist_exit_is_success(code) => {
                info!("Redistributable installer finished with {}", code);
                if let Err(e) = tokio::fs::write(&self.marker, code.to_string()).await {
                    warn!("Could not write redistributable marker: {}", e);
                }
                RedistOutcome::Installed
            }
            Ok(code) => {
                warn!("Redistributable installer exited with {}", code);
                RedistOutcome::Failed(format!("installer exit code {code}"))
            }
            Err(e) => {
                warn!("Redistributable install failed: {}", e);
                RedistOutcome::Failed(e.to_string())
            }
        }
    }

    async fn install(&self, cancel: &CancellationToken) -> LauncherResult<i32> {
        let installer = self.downloads_dir.join("vc_redist.x64.exe");
        self.downloader
            .download_file(&self.url, &installer, None, Some(cancel), |_, _| {})
            .await?;

        let status = tokio::process::Command::new(&installer)
            .args(["/install", "/quiet", "/norestart"])
            .status()
            .await
            .map_err(|source| LauncherError::io(&installer, source))?;
        let _ = tokio::fs::remove_file(&installer).await;

        Ok(status.code().unwrap_or(-1))
    }
}

async fn registry_reports_installed() -> bool {
    let output = tokio::process::Command::new("reg")
        .args(["query", REGISTRY_KEY, "/v", "Installed"])
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            parse_registry_installed(&String::from_utf8_lossy(&output.stdout))
        }
        _ => false,
    }
}

fn parse_registry_installed(stdout: &str) -> bool {
    stdout
        .lines()
        .filter(|line| line.trim_start().starts_with("Installed"))
        .any(|line| line.split_whitespace().last() == Some("0x1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_exit_codes() {
        assert!(redist_exit_is_success(0));
        assert!(redist_exit_is_success(1638));
        assert!(redist_exit_is_success(3010));
        assert!(!redist_exit_is_success(1603));
        assert!(!redist_exit_is_success(-1));
    }

    #[test]
    fn registry_output_parsing() {
        let installed = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\...\\x64\r\n    Installed    REG_DWORD    0x1\r\n";
        assert!(parse_registry_installed(installed));
        assert!(!parse_registry_installed(
            "    Installed    REG_DWORD    0x0\r\n"
        ));
        assert!(!parse_registry_installed(""));
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn not_required_off_windows() {
        let tmp = tempfile::tempdir().unwrap();
        let provisioner = RedistProvisioner::new(
            Downloader::new(reqwest::Client::new()),
            tmp.path().to_path_buf(),
            tmp.path().join("downloads"),
        );
        assert_eq!(
            provisioner.ensure_redistributable(&CancellationToken::new()).await,
            RedistOutcome::NotRequired
        );
    }
}
