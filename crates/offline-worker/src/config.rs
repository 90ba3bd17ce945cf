//! Worker configuration: cache version and the pre-cache manifest.

use offline_common::{OfflineError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Bucket name of the shipped worker version. Bump it to invalidate every
/// previously cached entry on the next activation.
pub const DEFAULT_CACHE_NAME: &str = "ertvc-inventory-pro-v2";

/// Origin the app-local manifest entries resolve against.
pub const DEFAULT_ORIGIN: &str = "http://localhost/";

/// Assets pre-cached at install time.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/manifest.json",
    "https://cdn.tailwindcss.com?plugins=typography",
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.5.1/css/all.min.css",
    "https://unpkg.com/@babel/standalone/babel.min.js",
    "https://esm.sh/react@18.3.1",
    "https://esm.sh/react@18.3.1/jsx-runtime",
    "https://esm.sh/react-dom@18.3.1/client",
    "https://esm.sh/recharts@2.12.7",
    "https://cdnjs.cloudflare.com/ajax/libs/jspdf/2.5.1/jspdf.umd.min.js",
    "https://cdnjs.cloudflare.com/ajax/libs/jspdf-autotable/3.8.2/jspdf.plugin.autotable.min.js",
    "https://cdn.sheetjs.com/xlsx-latest/package/dist/xlsx.full.min.js",
    "https://cdn.jsdelivr.net/npm/mammoth@1.6.0/mammoth.browser.min.js",
    "https://esm.sh/@google/genai",
];

/// How the installer populates the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecacheMode {
    /// Every manifest entry is fetched and stored on its own.
    #[default]
    BestEffort,
    /// All-or-nothing: one failing entry stores nothing.
    Atomic,
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the current cache bucket (the version identifier).
    pub cache_name: String,

    /// Application origin.
    pub origin: String,

    /// Manifest entries, absolute or relative to `origin`.
    pub manifest: Vec<String>,

    /// Pre-cache policy.
    pub precache: PrecacheMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
            precache: PrecacheMode::default(),
        }
    }
}

impl WorkerConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OfflineError::config_with_source("invalid worker config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the bucket name.
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Set the application origin.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Replace the manifest.
    pub fn with_manifest<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Set the pre-cache policy.
    pub fn with_precache(mut self, mode: PrecacheMode) -> Self {
        self.precache = mode;
        self
    }

    /// Parsed application origin.
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin)
            .map_err(|e| OfflineError::config_with_source(format!("invalid origin {:?}", self.origin), e))
    }

    /// Resolve the manifest against the origin.
    pub fn manifest(&self) -> Result<Manifest> {
        let origin = self.origin_url()?;
        let urls = self
            .manifest
            .iter()
            .map(|entry| {
                origin.join(entry).map_err(|e| {
                    OfflineError::config_with_source(format!("invalid manifest entry {entry:?}"), e)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Manifest(urls))
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(OfflineError::config("cache name must not be empty"));
        }
        self.manifest().map(|_| ())
    }
}

/// Resolved, ordered manifest of one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest(Vec<Url>);

impl Manifest {
    pub fn urls(&self) -> &[Url] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_name, "ertvc-inventory-pro-v2");
        assert_eq!(config.precache, PrecacheMode::BestEffort);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reference_manifest_shape() {
        let manifest = WorkerConfig::default().manifest().unwrap();
        assert_eq!(manifest.len(), 15);

        let local = manifest
            .urls()
            .iter()
            .filter(|u| u.host_str() == Some("localhost"))
            .count();
        assert_eq!(local, 3);
        assert_eq!(manifest.urls()[1].as_str(), "http://localhost/index.html");
    }

    #[test]
    fn test_manifest_keeps_query_and_order() {
        let manifest = WorkerConfig::default()
            .with_origin("https://inventory.example/")
            .with_manifest(["/b", "https://cdn.tailwindcss.com?plugins=typography", "/a"])
            .manifest()
            .unwrap();
        let urls: Vec<&str> = manifest.urls().iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            [
                "https://inventory.example/b",
                "https://cdn.tailwindcss.com/?plugins=typography",
                "https://inventory.example/a",
            ]
        );
    }

    #[test]
    fn test_from_json_partial() {
        let config = WorkerConfig::from_json(
            r#"{"cache_name": "v1", "manifest": ["/a"], "precache": "atomic"}"#,
        )
        .unwrap();
        assert_eq!(config.cache_name, "v1");
        assert_eq!(config.origin, DEFAULT_ORIGIN);
        assert_eq!(config.manifest, vec!["/a".to_string()]);
        assert_eq!(config.precache, PrecacheMode::Atomic);
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let err = WorkerConfig::default().with_cache_name("  ").validate().unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_validate_rejects_bad_origin() {
        let err = WorkerConfig::default().with_origin("not a url").validate().unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(WorkerConfig::from_json("{ nope").is_err());
    }
}
