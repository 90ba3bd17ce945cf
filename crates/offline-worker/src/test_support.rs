//! Scripted collaborators for handler tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashbrown::HashMap;
use http::StatusCode;
use offline_common::Result;
use offline_net::{Fetcher, NetError, Request, Response};
use tokio::sync::Notify;

use crate::cache::{Cache, CacheStorage, MemoryCacheStorage};

#[derive(Debug, Clone)]
enum Reply {
    Status(u16, &'static str),
    Fail,
}

/// Fetcher answering from a URL table. Unknown URLs fail like an offline
/// network would.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Reply>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ok(self, url: &str, body: &'static str) -> Self {
        self.set_ok(url, body);
        self
    }

    pub(crate) fn status(self, url: &str, status: u16) -> Self {
        self.set(url, Reply::Status(status, ""));
        self
    }

    pub(crate) fn fail(self, url: &str) -> Self {
        self.set(url, Reply::Fail);
        self
    }

    /// Hold every fetch until the gate is notified once per request.
    /// Held fetches are released in call order.
    pub(crate) fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn set_ok(&self, url: &str, body: &'static str) {
        self.set(url, Reply::Status(200, body));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set(&self, url: &str, reply: Reply) {
        self.routes.lock().unwrap().insert(url.to_string(), reply);
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetError> {
        // The reply is fixed when the call starts, not when the gate opens.
        let reply = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match reply {
            Some(Reply::Status(status, body)) => Ok(Response::new(
                request.url.clone(),
                StatusCode::from_u16(status).unwrap(),
                body,
            )),
            Some(Reply::Fail) | None => Err(NetError::RequestFailed(format!(
                "offline: {}",
                request.url
            ))),
        }
    }
}

/// Storage wrapper that counts every call into the store.
#[derive(Default)]
pub(crate) struct CountingStorage {
    pub(crate) inner: MemoryCacheStorage,
    ops: AtomicUsize,
    fail_open: AtomicBool,
    fail_delete: Mutex<Vec<String>>,
}

impl CountingStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ops(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    /// Make every `open` report a store failure.
    pub(crate) fn fail_opens(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Make `delete(name)` report a store failure.
    pub(crate) fn fail_delete_of(&self, name: &str) {
        self.fail_delete.lock().unwrap().push(name.to_string());
    }

    fn tick(&self) {
        self.ops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStorage for CountingStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        self.tick();
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(offline_common::OfflineError::cache("storage unavailable"));
        }
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        self.tick();
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        self.tick();
        if self.fail_delete.lock().unwrap().iter().any(|n| n == name) {
            return Err(offline_common::OfflineError::cache(format!("{name} is locked")));
        }
        self.inner.delete(name).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.tick();
        self.inner.keys().await
    }
}
