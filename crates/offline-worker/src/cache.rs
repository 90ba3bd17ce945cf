//! Cache buckets and the storage namespace that holds them.
//!
//! The worker only needs a handful of store operations: open-by-name,
//! match, put, list names and delete-by-name. They are traits so a host can
//! plug in its own persistent store; [`MemoryCacheStorage`] is the default.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (one per version name)
//!             └── RequestKey → Response
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use offline_common::{OfflineError, Result};
use offline_net::{Fetcher, Request, RequestKey, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

/// A named bucket of request/response pairs.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Bucket name.
    fn name(&self) -> &str;

    /// Stored response for the request's identity, if any.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>>;

    /// Store `response` for `request`, replacing any previous entry.
    async fn put(&self, request: &Request, response: Response) -> Result<()>;

    /// Remove the entry for `request`.
    async fn delete(&self, request: &Request) -> Result<bool>;

    /// Identities of all stored entries.
    async fn keys(&self) -> Result<Vec<RequestKey>>;
}

/// The namespace of cache buckets.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>>;

    /// Check if a bucket exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete a bucket. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Names of all buckets.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Fetch `url` and store it. Non-OK statuses are failures.
pub async fn add(cache: &dyn Cache, fetcher: &dyn Fetcher, url: &Url) -> Result<()> {
    let (request, response) = fetch_for_cache(fetcher, url).await?;
    cache.put(&request, response).await
}

/// Fetch every URL and store them all, or store nothing if any fetch fails.
pub async fn add_all(cache: &dyn Cache, fetcher: &dyn Fetcher, urls: &[Url]) -> Result<()> {
    let fetched = try_join_all(urls.iter().map(|url| fetch_for_cache(fetcher, url))).await?;
    for (request, response) in fetched {
        cache.put(&request, response).await?;
    }
    Ok(())
}

async fn fetch_for_cache(fetcher: &dyn Fetcher, url: &Url) -> Result<(Request, Response)> {
    let request = Request::get(url.clone());
    let response = fetcher
        .fetch(&request)
        .await
        .map_err(|e| OfflineError::network_with_source(format!("fetching {url}"), e))?;
    if !response.ok() {
        return Err(OfflineError::network(format!(
            "fetching {url}: bad status {}",
            response.status
        )));
    }
    Ok((request, response))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Entries ====================

/// Serializable form of a cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, repeated names allowed.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    fn from_stored(key: &RequestKey, stored: &Stored) -> Self {
        let response = &stored.response;
        Self {
            url: key.url.clone(),
            method: key.method.to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: response.body.to_vec(),
            cached_at: stored.cached_at,
        }
    }

    fn into_stored(self) -> Result<(RequestKey, Stored)> {
        let corrupt = |what: &str| OfflineError::cache(format!("corrupt entry {}: {what}", self.url));

        let method = Method::from_bytes(self.method.as_bytes()).map_err(|_| corrupt("method"))?;
        let url = Url::parse(&self.url).map_err(|_| corrupt("url"))?;
        let status = StatusCode::from_u16(self.status).map_err(|_| corrupt("status"))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| corrupt("header name"))?;
            let value = HeaderValue::from_str(value).map_err(|_| corrupt("header value"))?;
            headers.append(name, value);
        }

        let key = RequestKey::new(method, &url);
        let response = Response {
            url,
            status,
            headers,
            body: self.body.into(),
        };
        Ok((
            key,
            Stored {
                response,
                cached_at: self.cached_at,
            },
        ))
    }
}

#[derive(Debug, Clone)]
struct Stored {
    response: Response,
    cached_at: u64,
}

// ==================== Memory Cache ====================

/// In-memory bucket.
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<RequestKey, Stored>>,
}

impl MemoryCache {
    /// Create a new empty bucket.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn entries(&self) -> Vec<CacheEntry> {
        let entries = self.entries.read().await;
        let mut out: Vec<CacheEntry> = entries
            .iter()
            .map(|(key, stored)| CacheEntry::from_stored(key, stored))
            .collect();
        out.sort_by(|a, b| a.url.cmp(&b.url));
        out
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let hit = self
            .entries
            .read()
            .await
            .get(&request.key())
            .map(|stored| stored.response.clone());
        trace!(cache = %self.name, url = %request.url, hit = hit.is_some(), "Cache match");
        Ok(hit)
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        if !request.is_get() {
            return Err(OfflineError::InvalidArgument(format!(
                "only GET requests can be cached, got {}",
                request.method
            )));
        }
        let stored = Stored {
            response,
            cached_at: now_millis(),
        };
        self.entries.write().await.insert(request.key(), stored);
        debug!(cache = %self.name, url = %request.url, "Cache put");
        Ok(())
    }

    async fn delete(&self, request: &Request) -> Result<bool> {
        Ok(self.entries.write().await.remove(&request.key()).is_some())
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

// ==================== Memory Cache Storage ====================

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
}

/// One bucket in a [`StorageSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub name: String,
    pub entries: Vec<CacheEntry>,
}

/// Serializable copy of every bucket in a storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub caches: Vec<CacheSnapshot>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle to a bucket, without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.caches.read().await.get(name).cloned()
    }

    /// Copy all buckets.
    pub async fn snapshot(&self) -> StorageSnapshot {
        let caches: Vec<Arc<MemoryCache>> = self.caches.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(caches.len());
        for cache in caches {
            out.push(CacheSnapshot {
                name: cache.name.clone(),
                entries: cache.entries().await,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        StorageSnapshot { caches: out }
    }

    /// Rebuild a storage from a snapshot.
    pub fn restore(snapshot: StorageSnapshot) -> Result<Self> {
        let mut caches = HashMap::with_capacity(snapshot.caches.len());
        for bucket in snapshot.caches {
            let mut entries = HashMap::with_capacity(bucket.entries.len());
            for entry in bucket.entries {
                let (key, stored) = entry.into_stored()?;
                entries.insert(key, stored);
            }
            let cache = MemoryCache {
                name: bucket.name.clone(),
                entries: RwLock::new(entries),
            };
            caches.insert(bucket.name, Arc::new(cache));
        }
        Ok(Self {
            caches: RwLock::new(caches),
        })
    }

    /// Serialize all buckets to JSON.
    pub async fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.snapshot().await)
            .map_err(|e| OfflineError::cache_with_source("serializing cache storage", e))
    }

    /// Load buckets from JSON produced by [`MemoryCacheStorage::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: StorageSnapshot = serde_json::from_str(json)
            .map_err(|e| OfflineError::cache_with_source("parsing cache storage", e))?;
        Self::restore(snapshot)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        if let Some(cache) = self.caches.read().await.get(name) {
            return Ok(cache.clone() as Arc<dyn Cache>);
        }
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cache = %name, "Creating cache");
                Arc::new(MemoryCache::new(name))
            })
            .clone();
        Ok(cache as Arc<dyn Cache>)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
