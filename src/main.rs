use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use hyprism_lib::commands::{self, SharedState};
use hyprism_lib::core::error::LauncherResult;
use hyprism_lib::core::launch::LaunchOutcome;
use hyprism_lib::core::progress::{LaunchEvent, ProgressSink};
use hyprism_lib::core::version::Branch;

#[derive(Parser)]
#[command(name = "hyprism", about = "HyPrism game launcher", version)]
struct Cli {
    /// Launcher data directory.
    #[arg(long, env = "HYPRISM_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known versions of a branch, newest first.
    Versions {
        #[arg(long)]
        branch: Option<Branch>,
    },

    /// Show install/update status of the selected version.
    Status {
        #[arg(long)]
        branch: Option<Branch>,
        /// `0` means latest.
        #[arg(long)]
        version: Option<u32>,
    },

    /// Import configs and instances left by older launcher builds.
    Migrate,

    /// Install or update if needed, then start the game.
    Launch {
        #[arg(long)]
        branch: Option<Branch>,
        /// `0` means latest.
        #[arg(long)]
        version: Option<u32>,
        /// Return once the game is up instead of waiting for it to exit.
        #[arg(long)]
        detach: bool,
    },
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Serialization error: {e}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let state = match hyprism_lib::run(cli.data_dir) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Startup error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Versions { branch } => commands::get_versions(&state, branch)
            .await
            .map(|versions| print_json(&versions)),
        Command::Status { branch, version } => commands::get_status(&state, branch, version)
            .await
            .map(|report| print_json(&report)),
        Command::Migrate => commands::migrate_legacy_data(&state)
            .await
            .map(|report| print_json(&report)),
        Command::Launch {
            branch,
            version,
            detach,
        } => run_launch(&state, branch, version, detach).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_launch(
    state: &SharedState,
    branch: Option<Branch>,
    version: Option<u32>,
    detach: bool,
) -> LauncherResult<()> {
    if branch.is_some() || version.is_some() {
        let current = state.lock().await.config.snapshot();
        commands::select_version(
            state,
            branch.unwrap_or_else(|| current.branch()),
            version.unwrap_or(current.selected_version),
        )
        .await?;
    }

    let (progress, mut events) = ProgressSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_json(&event);
            if matches!(event, LaunchEvent::Stopped { .. }) {
                break;
            }
        }
    });

    // First Ctrl-C cancels the launch (or just the wait once the game runs).
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let outcome = commands::launch_game(state, &progress, &cancel).await?;
    drop(progress);
    print_json(&outcome);

    if detach || matches!(outcome, LaunchOutcome::Cancelled | LaunchOutcome::Detached { .. }) {
        return Ok(());
    }

    // Wait for the game; another Ctrl-C closes it.
    tokio::select! {
        _ = printer => {}
        interrupted = tokio::signal::ctrl_c() => {
            if interrupted.is_ok() {
                commands::force_close_instance(state).await?;
                while commands::is_game_running(state).await {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
    Ok(())
}
