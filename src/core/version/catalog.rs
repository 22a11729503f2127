// ─── Version Catalog ───
// Discovers which game versions exist on the patch server. There is no
// listing endpoint, so versions are found by probing the full-install patch
// of each candidate number with a HEAD request.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::branch::Branch;
use super::cache::VersionCache;
use crate::core::error::{LauncherError, LauncherResult};

pub const DEFAULT_PATCH_HOST: &str = "game-patches.hytale.com";

/// Consecutive misses that end a forward probe.
pub const MISS_THRESHOLD: u32 = 3;

/// Parallel HEAD requests while re-verifying cached versions.
pub const VERIFY_CONCURRENCY: usize = 8;

/// Result of a single existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Exists,
    /// The server answered, and not with 2xx.
    Missing,
    /// No answer at all (DNS, connect, timeout).
    Failed,
}

#[derive(Debug, Default)]
struct ForwardProbe {
    found: Vec<u32>,
    probes: u32,
    failures: u32,
}

#[derive(Debug, Clone)]
pub struct VersionCatalog {
    client: Client,
    base_url: String,
    cache_path: PathBuf,
    os: String,
    arch: String,
    miss_threshold: u32,
    verify_concurrency: usize,
    refresh_lock: Arc<Mutex<()>>,
}

impl VersionCatalog {
    pub fn new(
        client: Client,
        patch_host: &str,
        cache_path: PathBuf,
        os: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: format!("https://{}/patches", patch_host.trim().trim_end_matches('/')),
            cache_path,
            os: os.into(),
            arch: arch.into(),
            miss_threshold: MISS_THRESHOLD,
            verify_concurrency: VERIFY_CONCURRENCY,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Point at a different server root, e.g. `http://127.0.0.1:1234/patches`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_miss_threshold(mut self, threshold: u32) -> Self {
        self.miss_threshold = threshold.max(1);
        self
    }

    pub fn with_verify_concurrency(mut self, concurrency: usize) -> Self {
        self.verify_concurrency = concurrency.max(1);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// `<base>/<os>/<arch>/<branch>/<from>/<to>.pwr`; `from = 0` is the full
    /// install.
    pub fn patch_url(&self, branch: Branch, from: u32, to: u32) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}.pwr",
            self.base_url,
            self.os,
            self.arch,
            branch.as_str(),
            from,
            to
        )
    }

    pub async fn probe(&self, branch: Branch, from: u32, to: u32) -> ProbeOutcome {
        let url = self.patch_url(branch, from, to);
        match self.client.head(&url).send().await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Exists,
            Ok(response) => {
                debug!("Probe {} -> {}", url, response.status());
                ProbeOutcome::Missing
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
                ProbeOutcome::Failed
            }
        }
    }

    /// Known versions of `branch`, newest first, without duplicates.
    ///
    /// Probes upward from the highest cached version until
    /// `miss_threshold` consecutive misses, while re-verifying every cached
    /// version in parallel. A cached version is dropped only when the server
    /// answers that it is gone; unreachable probes keep it.
    pub async fn list_versions(&self, branch: Branch) -> LauncherResult<Vec<u32>> {
        let _refresh = self.refresh_lock.lock().await;

        let mut cache = VersionCache::load(&self.cache_path).await;
        let known = cache.known(branch);
        let start = known.iter().next_back().map_or(1, |max| max + 1);

        let (forward, verified) = tokio::join!(
            self.probe_forward(branch, start),
            self.reverify(branch, &known)
        );

        if forward.found.is_empty() && forward.failures == forward.probes && known.is_empty() {
            return Err(LauncherError::CatalogUnavailable(branch.to_string()));
        }

        let merged: BTreeSet<u32> = verified.into_iter().chain(forward.found).collect();
        let versions: Vec<u32> = merged.iter().rev().copied().collect();

        cache.set_known(branch, merged);
        if let Err(e) = cache.save(&self.cache_path).await {
            warn!("Version cache not saved: {}", e);
        }

        info!(
            "Branch {}: {} versions, latest {:?}",
            branch,
            versions.len(),
            versions.first()
        );
        Ok(versions)
    }

    pub async fn latest_version(&self, branch: Branch) -> LauncherResult<Option<u32>> {
        Ok(self.list_versions(branch).await?.first().copied())
    }

    async fn probe_forward(&self, branch: Branch, start: u32) -> ForwardProbe {
        let mut result = ForwardProbe::default();
        let mut misses = 0;
        let mut version = start;

        while misses < self.miss_threshold {
            result.probes += 1;
            match self.probe(branch, 0, version).await {
                ProbeOutcome::Exists => {
                    result.found.push(version);
                    misses = 0;
                }
                ProbeOutcome::Missing => misses += 1,
                ProbeOutcome::Failed => {
                    misses += 1;
                    result.failures += 1;
                }
            }
            version += 1;
        }

        result
    }

    async fn reverify(&self, branch: Branch, known: &BTreeSet<u32>) -> BTreeSet<u32> {
        stream::iter(known.iter().copied())
            .map(|version| async move { (version, self.probe(branch, 0, version).await) })
            .buffer_unordered(self.verify_concurrency)
            .filter_map(|(version, outcome)| async move {
                if outcome == ProbeOutcome::Missing {
                    info!("Version {} of {} was removed upstream", version, branch);
                    None
                } else {
                    Some(version)
                }
            })
            .collect()
            .await
    }

    /// Versions whose patches bring `from` up to `to`, in apply order.
    pub fn patch_sequence(from: u32, to: u32) -> Vec<u32> {
        if from >= to {
            return Vec::new();
        }
        ((from + 1)..=to).collect()
    }

    /// Like [`Self::patch_sequence`], but confirms each `v-1 → v` patch is
    /// downloadable before anything is applied.
    pub async fn verified_patch_sequence(
        &self,
        branch: Branch,
        from: u32,
        to: u32,
    ) -> LauncherResult<Vec<u32>> {
        let sequence = Self::patch_sequence(from, to);

        let outcomes: Vec<(u32, ProbeOutcome)> = stream::iter(sequence.iter().copied())
            .map(|version| async move { (version, self.probe(branch, version - 1, version).await) })
            .buffered(self.verify_concurrency)
            .collect()
            .await;

        for (version, outcome) in outcomes {
            match outcome {
                ProbeOutcome::Exists => {}
                ProbeOutcome::Missing => {
                    return Err(LauncherError::MissingPatch {
                        branch: branch.to_string(),
                        from: version - 1,
                        to: version,
                    })
                }
                ProbeOutcome::Failed => {
                    return Err(LauncherError::CatalogUnavailable(branch.to_string()))
                }
            }
        }

        Ok(sequence)
    }
}
