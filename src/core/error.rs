use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the entire launcher backend.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    Sha256Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Serialization ───────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // ── Catalog ─────────────────────────────────────────
    #[error("Patch server unreachable for branch {0}")]
    CatalogUnavailable(String),

    #[error("No patch available from version {from} to {to} on {branch}")]
    MissingPatch { branch: String, from: u32, to: u32 },

    // ── Java ────────────────────────────────────────────
    #[error("Java runtime unavailable: {0}")]
    Runtime(String),

    // ── Launch ──────────────────────────────────────────
    #[error("Game executable not found at {0:?}")]
    ExecutableMissing(PathBuf),

    #[error("Failed to start game process: {0}")]
    Spawn(String),

    #[error("A launch is already in progress")]
    LaunchInProgress,

    #[error("Game is already running (PID {0})")]
    AlreadyRunning(u32),

    #[error("Installer error: {0}")]
    Installer(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Operation cancelled")]
    Cancelled,

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl LauncherError {
    /// Wrap an IO error together with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LauncherError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
