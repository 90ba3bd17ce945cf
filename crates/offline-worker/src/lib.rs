//! # Offline Worker
//!
//! An offline caching proxy for a single web application, driven by the
//! host's worker lifecycle.
//!
//! ## Features
//!
//! - **Install**: pre-cache a fixed manifest into the versioned bucket
//! - **Activate**: delete buckets of previous versions
//! - **Fetch**: stale-while-revalidate for every GET request
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker
//!     ├── Installer      (install)
//!     ├── Activator      (activate)
//!     └── FetchHandler   (fetch)
//!             │
//!             ├── CacheStorage ── Cache (named by WorkerConfig::cache_name)
//!             └── Fetcher (network)
//! ```
//!
//! The handlers share nothing but the bucket name from [`WorkerConfig`].

use std::fmt;
use std::sync::Arc;

use offline_common::Result;
use offline_net::{Fetcher, LoaderConfig, Request, ResourceLoader};
use tracing::{info, info_span, Instrument};

pub mod activate;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod install;

#[cfg(test)]
mod test_support;

pub use activate::{ActivateReport, Activator};
pub use cache::{
    Cache, CacheEntry, CacheSnapshot, CacheStorage, MemoryCache, MemoryCacheStorage,
    StorageSnapshot,
};
pub use config::{Manifest, PrecacheMode, WorkerConfig, DEFAULT_CACHE_NAME, DEFAULT_MANIFEST};
pub use fetch::{FetchHandler, FetchOutcome, ResponseSource, RevalidateStatus, Revalidation};
pub use install::{InstallReport, Installer, PrecacheFailure};

// ==================== Events ====================

/// A lifecycle or runtime event delivered by the host.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
}

impl WorkerEvent {
    /// Platform name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Fetch(_) => "fetch",
        }
    }
}

impl fmt::Display for WorkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of handling one [`WorkerEvent`].
#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivateReport),
    Fetched(FetchOutcome),
}

// ==================== Worker ====================

/// One worker version: its config and the three handlers.
pub struct OfflineWorker {
    config: WorkerConfig,
    installer: Installer,
    activator: Activator,
    fetch: FetchHandler,
}

impl OfflineWorker {
    /// Create a worker over the given store and network.
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        config.validate()?;

        let installer = Installer::new(&config, Arc::clone(&storage), Arc::clone(&fetcher))?;
        let activator = Activator::new(&config, Arc::clone(&storage));
        let fetch = FetchHandler::new(&config, storage, fetcher);

        info!(cache = %config.cache_name, "Offline worker created");

        Ok(Self {
            config,
            installer,
            activator,
            fetch,
        })
    }

    /// Create a worker with an in-memory store and a `reqwest` fetcher.
    pub fn with_defaults(config: WorkerConfig, loader: LoaderConfig) -> Result<Self> {
        let fetcher = ResourceLoader::new(loader)?;
        Self::new(config, Arc::new(MemoryCacheStorage::new()), Arc::new(fetcher))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Name of the current bucket.
    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    /// `install`: resolves once pre-caching has settled.
    pub async fn on_install(&self) -> InstallReport {
        self.installer
            .install()
            .instrument(info_span!("install", cache = %self.cache_name()))
            .await
    }

    /// `activate`: resolves once every stale bucket deletion has settled.
    pub async fn on_activate(&self) -> ActivateReport {
        self.activator
            .activate()
            .instrument(info_span!("activate", cache = %self.cache_name()))
            .await
    }

    /// `fetch`: stale-while-revalidate for GET, passthrough otherwise.
    pub async fn on_fetch(&self, request: Request) -> Result<FetchOutcome> {
        let span = info_span!("fetch", url = %request.url, method = %request.method);
        self.fetch.handle(request).instrument(span).await
    }

    /// Dispatch a host event to its handler.
    pub async fn handle(&self, event: WorkerEvent) -> Result<EventOutcome> {
        match event {
            WorkerEvent::Install => Ok(EventOutcome::Installed(self.on_install().await)),
            WorkerEvent::Activate => Ok(EventOutcome::Activated(self.on_activate().await)),
            WorkerEvent::Fetch(request) => self.on_fetch(request).await.map(EventOutcome::Fetched),
        }
    }
}
