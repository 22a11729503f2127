pub mod commands;
pub mod core;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::commands::SharedState;
use crate::core::config::AppPaths;
use crate::core::error::LauncherResult;
use crate::core::state::AppState;

/// Initialise logging and build the shared launcher state. `data_dir`
/// overrides the default application directory.
pub fn run(data_dir: Option<PathBuf>) -> LauncherResult<SharedState> {
    // Initialize structured logging
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hyprism_lib=debug")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    tracing::info!("HyPrism launcher starting...");

    let paths = match data_dir {
        Some(dir) => AppPaths::new(dir),
        None => AppPaths::from_environment()?,
    };
    let state = AppState::new(paths)?;
    Ok(Arc::new(Mutex::new(state)))
}
