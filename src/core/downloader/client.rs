use std::path::{Path, PathBuf};

use futures_util::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};

/// Read buffer for streamed downloads.
pub const DOWNLOAD_BUFFER_SIZE: usize = 8 * 1024;

/// Streams files to disk through a fixed-size buffer, hashing on the fly.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Download `url` to `dest`, validating SHA-256 when `expected_sha256`
    /// is given.
    ///
    /// Bytes land in `<dest>.part` first and are renamed into place only
    /// after the hash matched. `on_progress(downloaded, total)` runs inline
    /// in the read loop, so it must return quickly.
    pub async fn download_file<F>(
        &self,
        url: &str,
        dest: &Path,
        expected_sha256: Option<&str>,
        cancel: Option<&CancellationToken>,
        mut on_progress: F,
    ) -> LauncherResult<u64>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LauncherError::io(parent, source))?;
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let part = part_path(dest);
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(stream);

        let mut hasher = Sha256::new();
        let mut downloaded = 0_u64;
        let mut buffer = vec![0_u8; DOWNLOAD_BUFFER_SIZE];

        // The handle is dropped before the rename, Windows refuses to move
        // open files.
        {
            let mut file = tokio::fs::File::create(&part)
                .await
                .map_err(|source| LauncherError::io(&part, source))?;

            on_progress(0, total);
            loop {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    drop(file);
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(LauncherError::Cancelled);
                }

                let read = reader
                    .read(&mut buffer)
                    .await
                    .map_err(|source| LauncherError::io(&part, source))?;
                if read == 0 {
                    break;
                }

                file.write_all(&buffer[..read])
                    .await
                    .map_err(|source| LauncherError::io(&part, source))?;
                hasher.update(&buffer[..read]);
                downloaded += read as u64;
                on_progress(downloaded, total);
            }

            file.flush()
                .await
                .map_err(|source| LauncherError::io(&part, source))?;
        }

        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = expected_sha256.map(str::trim).filter(|e| !e.is_empty()) {
            if !actual.eq_ignore_ascii_case(expected) {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(LauncherError::Sha256Mismatch {
                    path: dest.to_path_buf(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|source| LauncherError::io(dest, source))?;

        debug!("Downloaded: {} -> {:?} ({} bytes)", url, dest, downloaded);
        info!("Download complete: {:?}", dest.file_name().unwrap_or_default());
        Ok(downloaded)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// SHA-256 of a file on disk, hex encoded.
pub async fn sha256_file(path: &Path) -> LauncherResult<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| LauncherError::io(path, source))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; DOWNLOAD_BUFFER_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|source| LauncherError::io(path, source))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
