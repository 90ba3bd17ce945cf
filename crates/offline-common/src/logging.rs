//! Logging configuration and setup.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer, Registry,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Include source file location.
    pub include_location: bool,
    /// Include span events (enter, exit).
    pub include_span_events: bool,
    /// Write to the test writer so output is captured per test.
    pub test_writer: bool,
    /// Custom filter string (e.g., "offline_worker=debug,reqwest=warn").
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            test_writer: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Create a debug configuration.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// Create a production configuration.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Compact debug output routed through the libtest capture.
    pub fn test() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Compact,
            test_writer: true,
            ..Default::default()
        }
    }

    /// Set a custom filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match self.filter {
            Some(ref custom) => EnvFilter::try_new(custom).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = if self.include_span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        match (self.format, self.test_writer) {
            (LogFormat::Pretty, false) => fmt::layer()
                .with_target(true)
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .with_span_events(span_events)
                .boxed(),
            (LogFormat::Pretty, true) => fmt::layer()
                .with_test_writer()
                .with_target(true)
                .with_span_events(span_events)
                .boxed(),
            (LogFormat::Compact, false) => fmt::layer()
                .compact()
                .with_target(true)
                .with_span_events(span_events)
                .boxed(),
            (LogFormat::Compact, true) => fmt::layer()
                .compact()
                .with_test_writer()
                .with_target(true)
                .with_span_events(span_events)
                .boxed(),
            (LogFormat::Json, false) => fmt::layer().json().with_span_events(span_events).boxed(),
            (LogFormat::Json, true) => fmt::layer()
                .json()
                .with_test_writer()
                .with_span_events(span_events)
                .boxed(),
        }
    }
}

/// Initialize logging, failing if a global subscriber is already installed.
pub fn try_init_logging(config: LogConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.env_filter())
        .try_init()
}

/// Initialize logging with the given configuration.
///
/// A second call is a no-op; the first subscriber stays installed.
pub fn init_logging(config: LogConfig) {
    if let Err(err) = try_init_logging(config) {
        tracing::debug!(error = %err, "Logging already initialized");
    }
}
