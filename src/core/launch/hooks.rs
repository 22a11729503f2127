use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::instance::model::USER_DATA_DIR;

/// Skins the client caches per player, one `<uuid>.json` each.
pub const SKIN_CACHE_DIR: &str = "CachedPlayerSkins";

/// What the session knows about the running game.
#[derive(Debug, Clone, Default)]
pub struct GameSession {
    pub nick: String,
    pub uuid: Option<Uuid>,
    /// Unknown for a game adopted after a launcher restart.
    pub instance_dir: Option<PathBuf>,
}

/// Side work around a game session. Every step defaults to doing nothing.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    async fn on_started(&self, _session: &GameSession) -> LauncherResult<()> {
        Ok(())
    }

    async fn stop_skin_protection(&self, _session: &GameSession) {}

    async fn backup_skin(&self, _session: &GameSession) -> LauncherResult<()> {
        Ok(())
    }

    async fn reset_presence(&self, _session: &GameSession) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {}

/// Keeps a copy of the player's cached skin outside the instance and puts
/// it back when a fresh install lost it.
#[derive(Debug, Clone)]
pub struct SkinBackupHooks {
    backup_dir: PathBuf,
}

impl SkinBackupHooks {
    pub fn new(backup_dir: PathBuf) -> Self {
        Self { backup_dir }
    }

    fn paths(&self, session: &GameSession) -> Option<(PathBuf, PathBuf)> {
        let uuid = session.uuid?;
        let dir = session.instance_dir.as_deref()?;
        let file = format!("{uuid}.json");
        Some((skin_cache_file(dir, &file), self.backup_dir.join(file)))
    }
}

fn skin_cache_file(instance_dir: &Path, file: &str) -> PathBuf {
    instance_dir.join(USER_DATA_DIR).join(SKIN_CACHE_DIR).join(file)
}

async fn copy_file(from: &Path, to: &Path) -> LauncherResult<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| LauncherError::io(parent, source))?;
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|source| LauncherError::io(from, source))?;
    Ok(())
}

#[async_trait]
impl SessionHooks for SkinBackupHooks {
    async fn on_started(&self, session: &GameSession) -> LauncherResult<()> {
        let Some((cached, backup)) = self.paths(session) else {
            return Ok(());
        };
        if !cached.exists() && backup.is_file() {
            copy_file(&backup, &cached).await?;
            info!("Restored skin for {} from backup", session.nick);
        }
        Ok(())
    }

    async fn backup_skin(&self, session: &GameSession) -> LauncherResult<()> {
        let Some((cached, backup)) = self.paths(session) else {
            return Ok(());
        };
        if !cached.is_file() {
            debug!("No cached skin at {:?}", cached);
            return Ok(());
        }
        copy_file(&cached, &backup).await?;
        debug!("Backed up skin to {:?}", backup);
        Ok(())
    }
}
