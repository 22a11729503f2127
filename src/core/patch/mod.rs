// ─── Binary patching ───
// The launcher rewrites a few bytes of the client and server artifacts
// (e.g. the auth domain) before launch. Files are loaded whole, so buffers
// are pooled to keep peak memory flat across consecutive patches.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};

pub const DEFAULT_POOLED_BUFFERS: usize = 2;

/// Domain compiled into the stock client and server.
pub const OFFICIAL_DOMAIN: &str = "hytale.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchTarget {
    Client,
    Server,
}

/// Byte-level patcher for game artifacts.
#[async_trait]
pub trait ClientPatcher: Send + Sync {
    /// Rewrite `bytes` in place. Returns whether anything changed.
    async fn patch(&self, target: PatchTarget, bytes: &mut Vec<u8>) -> LauncherResult<bool>;
}

/// Leaves every artifact untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPatcher;

#[async_trait]
impl ClientPatcher for NoopPatcher {
    async fn patch(&self, _target: PatchTarget, _bytes: &mut Vec<u8>) -> LauncherResult<bool> {
        Ok(false)
    }
}

/// Swaps one domain for another, both as UTF-8 and as UTF-16LE (the client
/// stores managed strings in the latter). Both domains must have the same
/// byte length so offsets inside the binary stay valid.
#[derive(Debug, Clone)]
pub struct DomainPatcher {
    from: String,
    to: String,
}

impl DomainPatcher {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> LauncherResult<Self> {
        let from = from.into();
        let to = to.into();
        if from.is_empty() || from.len() != to.len() || !from.is_ascii() || !to.is_ascii() {
            return Err(LauncherError::Other(format!(
                "cannot patch domain {from:?} to {to:?}: ASCII domains of equal length required"
            )));
        }
        Ok(Self { from, to })
    }
}

#[async_trait]
impl ClientPatcher for DomainPatcher {
    async fn patch(&self, target: PatchTarget, bytes: &mut Vec<u8>) -> LauncherResult<bool> {
        if self.from == self.to {
            return Ok(false);
        }
        let narrow = replace_in_place(bytes, self.from.as_bytes(), self.to.as_bytes());
        let wide = replace_in_place(bytes, &utf16le(&self.from), &utf16le(&self.to));
        if narrow + wide > 0 {
            info!(
                "Patched {:?}: {} -> {} ({} UTF-8, {} UTF-16 occurrences)",
                target, self.from, self.to, narrow, wide
            );
        }
        Ok(narrow + wide > 0)
    }
}

fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Replace every non-overlapping `needle` with an equally long
/// `replacement`. Returns the number of replacements.
pub fn replace_in_place(bytes: &mut [u8], needle: &[u8], replacement: &[u8]) -> usize {
    if needle.is_empty() || needle.len() != replacement.len() {
        return 0;
    }
    let mut count = 0;
    let mut i = 0;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] == needle {
            bytes[i..i + needle.len()].copy_from_slice(replacement);
            i += needle.len();
            count += 1;
        } else {
            i += 1;
        }
    }
    count
}

/// Reusable byte buffers for whole-file patching.
#[derive(Debug)]
pub struct PatchBufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_buffers: usize,
}

impl Default for PatchBufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOLED_BUFFERS)
    }
}

impl PatchBufferPool {
    pub fn new(max_buffers: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_buffers,
        }
    }

    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_default();
        PooledBuffer {
            buffer,
            pool: Arc::clone(self),
        }
    }

    /// Buffers currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut buffers = self
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if buffers.len() < self.max_buffers {
            buffers.push(buffer);
        }
    }
}

/// Returned to its pool on drop, emptied but with its capacity kept.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<PatchBufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

/// Patch one artifact on disk. A missing file is not an error and reports
/// no change. Changed bytes are written next to the file and renamed over
/// it, keeping the original permissions.
pub async fn patch_file(
    patcher: &dyn ClientPatcher,
    pool: &Arc<PatchBufferPool>,
    target: PatchTarget,
    path: &Path,
) -> LauncherResult<bool> {
    if !path.is_file() {
        debug!("Nothing to patch at {:?}", path);
        return Ok(false);
    }

    let mut buffer = pool.acquire();
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| LauncherError::io(path, source))?;
    file.read_to_end(&mut buffer)
        .await
        .map_err(|source| LauncherError::io(path, source))?;
    drop(file);

    if !patcher.patch(target, &mut buffer).await? {
        return Ok(false);
    }

    let permissions = tokio::fs::metadata(path)
        .await
        .map_err(|source| LauncherError::io(path, source))?
        .permissions();
    let staging = staging_path(path);
    tokio::fs::write(&staging, &buffer[..])
        .await
        .map_err(|source| LauncherError::io(&staging, source))?;
    tokio::fs::set_permissions(&staging, permissions)
        .await
        .map_err(|source| LauncherError::io(&staging, source))?;
    tokio::fs::rename(&staging, path)
        .await
        .map_err(|source| LauncherError::io(path, source))?;
    Ok(true)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".patching");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn domain_patch_rewrites_both_encodings() {
        let patcher = DomainPatcher::new("hytale.com", "sanasol.ws").unwrap();
        let mut bytes = b"https://sessions.hytale.com/x\0".to_vec();
        bytes.extend(utf16le("auth.hytale.com"));

        assert!(patcher.patch(PatchTarget::Client, &mut bytes).await.unwrap());
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("sessions.sanasol.ws"));
        assert!(!text.contains("hytale.com"));
        assert_eq!(
            replace_in_place(&mut bytes, &utf16le("sanasol.ws"), &utf16le("sanasol.ws")),
            1
        );

        assert!(!patcher.patch(PatchTarget::Client, &mut bytes).await.unwrap());
    }

    #[test]
    fn domain_lengths_must_match() {
        assert!(DomainPatcher::new("hytale.com", "example.org.uk").is_err());
        assert!(DomainPatcher::new("", "").is_err());
    }

    #[test]
    fn pool_keeps_capacity_and_caps_idle_buffers() {
        let pool = Arc::new(PatchBufferPool::new(1));
        {
            let mut a = pool.acquire();
            let mut b = pool.acquire();
            a.extend_from_slice(&[0u8; 4096]);
            b.push(1);
        }
        assert_eq!(pool.idle(), 1);

        let reused = pool.acquire();
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 1);
        assert_eq!(pool.idle(), 0);
    }

    #[tokio::test]
    async fn patch_file_writes_only_on_change() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("HytaleServer.jar");
        std::fs::write(&file, b"connect to hytale.com").unwrap();
        let pool = Arc::new(PatchBufferPool::default());

        assert!(!patch_file(&NoopPatcher, &pool, PatchTarget::Server, &file)
            .await
            .unwrap());
        assert_eq!(std::fs::read(&file).unwrap(), b"connect to hytale.com");

        let patcher = DomainPatcher::new("hytale.com", "sanasol.ws").unwrap();
        assert!(patch_file(&patcher, &pool, PatchTarget::Server, &file)
            .await
            .unwrap());
        assert_eq!(std::fs::read(&file).unwrap(), b"connect to sanasol.ws");
        assert!(!staging_path(&file).exists());

        let missing = tmp.path().join("absent.jar");
        assert!(!patch_file(&patcher, &pool, PatchTarget::Server, &missing)
            .await
            .unwrap());
    }
}
