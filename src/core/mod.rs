// ─── HyPrism Core ───
// Backend of the HyPrism game launcher.
//
// Architecture:
//   core/
//     config/      Launcher config (config.json) + data directory layout
//     version/     Branches, remote version catalog, cache, update status
//     instance/    Instance layout, lookup and legacy data migration
//     downloader/  Streaming downloads with SHA-256 validation
//     java/        Pinned Java runtime provisioning + POSIX shim
//     redist/      Windows MSVC redistributable
//     install/     Game install/update through butler patches
//     patch/       Byte-level client/server patching
//     auth/        Game session tokens
//     process/     Game process tracking + orphan recovery
//     launch/      Platform strategies, readiness, launch orchestration
//     state/       Service wiring shared by commands

pub mod auth;
pub mod config;
pub mod downloader;
pub mod error;
pub mod http;
pub mod install;
pub mod instance;
pub mod java;
pub mod launch;
pub mod patch;
pub mod process;
pub mod progress;
pub mod redist;
pub mod state;
pub mod version;
