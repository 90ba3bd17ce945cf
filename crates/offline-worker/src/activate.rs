//! Activate handler: drop buckets left behind by earlier versions.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info};

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;

/// What an activation run removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// The current bucket, if it exists.
    pub kept: Option<String>,
    /// Stale buckets removed.
    pub deleted: Vec<String>,
    /// Stale buckets whose deletion failed.
    pub failed: Vec<String>,
}

/// Deletes every bucket whose name is not the current one.
pub struct Activator {
    cache_name: String,
    storage: Arc<dyn CacheStorage>,
}

impl Activator {
    pub fn new(config: &WorkerConfig, storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            cache_name: config.cache_name.clone(),
            storage,
        }
    }

    /// Run the activate step. Deletions run concurrently and the call
    /// resolves after every one of them has settled.
    pub async fn activate(&self) -> ActivateReport {
        let mut report = ActivateReport::default();

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(err) => {
                error!(error = %err, "Failed to list caches");
                return report;
            }
        };

        let (current, stale): (Vec<String>, Vec<String>) =
            names.into_iter().partition(|name| *name == self.cache_name);
        report.kept = current.into_iter().next();

        let results = join_all(stale.iter().map(|name| {
            info!(cache = %name, "Deleting old cache");
            self.storage.delete(name)
        }))
        .await;

        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(_) => report.deleted.push(name),
                Err(err) => {
                    error!(cache = %name, error = %err, "Failed to delete old cache");
                    report.failed.push(name);
                }
            }
        }
        report
    }
}
