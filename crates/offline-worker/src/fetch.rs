//! Fetch handler: stale-while-revalidate against the current bucket.
//!
//! For every GET the bucket is consulted first, then a network fetch is
//! spawned as its own task. A hit is answered at once and the task only
//! refreshes the bucket for later requests. A miss waits for the task's
//! response. There is no synthetic offline page: a miss with a failed
//! network fetch is an error for the host to present.

use std::sync::Arc;

use http::StatusCode;
use offline_common::{OfflineError, Result};
use offline_net::{Fetcher, NetError, Request, Response};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cache::{Cache, CacheStorage};
use crate::config::WorkerConfig;

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

/// Result of the background network exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidateStatus {
    /// A fresh copy was written to the bucket.
    Updated,
    /// The network answered with a status that is not stored.
    NotCacheable(StatusCode),
    /// The network fetch failed.
    NetworkFailed(String),
    /// The response could not be written.
    StoreFailed(String),
    /// The task ended without reporting (runtime shutdown).
    Interrupted,
}

/// Handle to the background network exchange of one request.
///
/// Dropping it detaches the task; it keeps running.
#[derive(Debug)]
pub struct Revalidation {
    handle: JoinHandle<RevalidateStatus>,
}

impl Revalidation {
    /// Wait for the exchange, including any cache write, to settle.
    pub async fn settled(self) -> RevalidateStatus {
        self.handle.await.unwrap_or(RevalidateStatus::Interrupted)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// What the worker does with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not handled; the host performs its default network fetch.
    Passthrough,
    /// Answered by the worker.
    Respond {
        response: Response,
        source: ResponseSource,
        revalidation: Revalidation,
    },
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Respond { response, .. } => Some(response),
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Respond { source, .. } => Some(*source),
        }
    }
}

/// Stale-while-revalidate request interceptor.
pub struct FetchHandler {
    cache_name: String,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl FetchHandler {
    pub fn new(
        config: &WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            cache_name: config.cache_name.clone(),
            storage,
            fetcher,
        }
    }

    /// Handle one intercepted request.
    ///
    /// Returns an error only when nothing is cached and the network fails.
    pub async fn handle(&self, request: Request) -> Result<FetchOutcome> {
        if !request.is_get() {
            debug!(url = %request.url, method = %request.method, "Not intercepting");
            return Ok(FetchOutcome::Passthrough);
        }

        let cache = match self.storage.open(&self.cache_name).await {
            Ok(cache) => Some(cache),
            Err(err) => {
                warn!(cache = %self.cache_name, error = %err, "Failed to open cache");
                None
            }
        };

        let cached = match &cache {
            Some(cache) => cache.match_request(&request).await.unwrap_or_else(|err| {
                warn!(url = %request.url, error = %err, "Cache lookup failed");
                None
            }),
            None => None,
        };

        let (tx, rx) = oneshot::channel();
        let revalidation = Revalidation {
            handle: tokio::spawn(revalidate(
                Arc::clone(&self.fetcher),
                cache,
                request.clone(),
                tx,
            )),
        };

        if let Some(response) = cached {
            debug!(url = %request.url, "Serving from cache");
            return Ok(FetchOutcome::Respond {
                response,
                source: ResponseSource::Cache,
                revalidation,
            });
        }

        match rx.await {
            Ok(Ok(response)) => Ok(FetchOutcome::Respond {
                response,
                source: ResponseSource::Network,
                revalidation,
            }),
            Ok(Err(err)) => Err(OfflineError::network_with_source(
                format!("{} is not cached and the network is unavailable", request.url),
                err,
            )),
            Err(_) => Err(OfflineError::internal("network task ended without a response")),
        }
    }
}

async fn revalidate(
    fetcher: Arc<dyn Fetcher>,
    cache: Option<Arc<dyn Cache>>,
    request: Request,
    tx: oneshot::Sender<std::result::Result<Response, NetError>>,
) -> RevalidateStatus {
    let response = match fetcher.fetch(&request).await {
        Ok(response) => response,
        Err(err) => {
            error!(url = %request.url, error = %err, "Fetch failed");
            let reason = err.to_string();
            // Receiver is gone when a cached copy was already served.
            let _ = tx.send(Err(err));
            return RevalidateStatus::NetworkFailed(reason);
        }
    };

    let status = response.status;
    let copy = response.is_cacheable().then(|| response.clone());
    let _ = tx.send(Ok(response));

    let Some(copy) = copy else {
        debug!(url = %request.url, status = %status, "Not caching response");
        return RevalidateStatus::NotCacheable(status);
    };
    let Some(cache) = cache else {
        return RevalidateStatus::StoreFailed("cache unavailable".to_string());
    };

    match cache.put(&request, copy).await {
        Ok(()) => {
            debug!(url = %request.url, cache = %cache.name(), "Revalidated");
            RevalidateStatus::Updated
        }
        Err(err) => {
            error!(url = %request.url, error = %err, "Failed to update cache");
            RevalidateStatus::StoreFailed(err.to_string())
        }
    }
}
