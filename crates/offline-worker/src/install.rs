//! Install handler: pre-cache the manifest into the current bucket.

use std::sync::Arc;

use futures::future::join_all;
use offline_common::Result;
use offline_net::Fetcher;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{self, CacheStorage};
use crate::config::{Manifest, PrecacheMode, WorkerConfig};

/// A manifest entry that could not be pre-cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheFailure {
    pub url: Url,
    pub reason: String,
}

/// What an install run stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Bucket that was populated.
    pub cache_name: String,
    /// Entries now in the bucket.
    pub cached: Vec<Url>,
    /// Entries that failed. Never fatal.
    pub failed: Vec<PrecacheFailure>,
}

impl InstallReport {
    /// Whether every manifest entry was stored.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Populates the current bucket when the worker installs.
pub struct Installer {
    cache_name: String,
    manifest: Manifest,
    mode: PrecacheMode,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl Installer {
    pub fn new(
        config: &WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        Ok(Self {
            cache_name: config.cache_name.clone(),
            manifest: config.manifest()?,
            mode: config.precache,
            storage,
            fetcher,
        })
    }

    /// Run the install step.
    ///
    /// Resolves only once the population attempt has settled. Failures are
    /// logged and reported, never returned: installation always completes.
    pub async fn install(&self) -> InstallReport {
        let mut report = InstallReport {
            cache_name: self.cache_name.clone(),
            ..Default::default()
        };

        let cache = match self.storage.open(&self.cache_name).await {
            Ok(cache) => cache,
            Err(err) => {
                error!(cache = %self.cache_name, error = %err, "Failed to open cache for install");
                report.failed = self.fail_all(&err.to_string());
                return report;
            }
        };

        info!(
            cache = %self.cache_name,
            assets = self.manifest.len(),
            mode = ?self.mode,
            "Opened cache and caching initial assets"
        );

        match self.mode {
            PrecacheMode::BestEffort => {
                let fetcher = self.fetcher.as_ref();
                let results = join_all(
                    self.manifest
                        .urls()
                        .iter()
                        .map(|url| cache::add(cache.as_ref(), fetcher, url)),
                )
                .await;

                for (url, result) in self.manifest.urls().iter().zip(results) {
                    match result {
                        Ok(()) => {
                            debug!(url = %url, "Pre-cached");
                            report.cached.push(url.clone());
                        }
                        Err(err) => {
                            warn!(url = %url, error = %err, "Failed to cache initial asset");
                            report.failed.push(PrecacheFailure {
                                url: url.clone(),
                                reason: err.to_string(),
                            });
                        }
                    }
                }
            }
            PrecacheMode::Atomic => {
                match cache::add_all(cache.as_ref(), self.fetcher.as_ref(), self.manifest.urls()).await {
                    Ok(()) => report.cached = self.manifest.urls().to_vec(),
                    Err(err) => report.failed = self.fail_all(&err.to_string()),
                }
            }
        }

        if !report.failed.is_empty() {
            error!(
                cache = %self.cache_name,
                cached = report.cached.len(),
                failed = report.failed.len(),
                "Failed to cache initial assets"
            );
        }
        report
    }

    fn fail_all(&self, reason: &str) -> Vec<PrecacheFailure> {
        self.manifest
            .urls()
            .iter()
            .map(|url| PrecacheFailure {
                url: url.clone(),
                reason: reason.to_string(),
            })
            .collect()
    }
}
