//! Unified logging infrastructure for warden.
//!
//! Both the supervisor and its worker subprocesses log through tracing;
//! workers inherit the `WARDEN_LOG*` environment, so one configuration
//! covers the whole process tree.
//!
//! # Environment Variables
//!
//! - `WARDEN_LOG` - Log filter (overrides RUST_LOG)
//! - `WARDEN_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `WARDEN_LOG_FORMAT` - Output format: pretty, compact, json
//! - `WARDEN_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)

use std::path::PathBuf;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format (default for development)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration.
///
/// Use the builder methods to customize, then pass to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    /// Log format (default: Pretty)
    pub format: LogFormat,
    /// Path to log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Show target module in logs (default: true)
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            filter: None,
            show_target: true,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the log file path.
    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Set a custom filter string.
    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// CLI arguments take precedence: if a filter is already set (e.g. from
    /// -v or --log-level), env vars won't override it.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("WARDEN_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level_str) = std::env::var("WARDEN_LOG_LEVEL")
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("WARDEN_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Ok(path) = std::env::var("WARDEN_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    /// Build the EnvFilter for this configuration.
    fn build_filter(&self) -> EnvFilter {
        if let Some(ref filter) = self.filter {
            EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                EnvFilter::new(format!("{}", self.level).to_lowercase())
            })
        } else {
            EnvFilter::new(format!("{}", self.level).to_lowercase())
        }
    }
}

/// Parse a log level string.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Build one fmt layer for the given format and writer.
fn fmt_layer<W>(
    format: LogFormat,
    writer: W,
    ansi: bool,
    show_target: bool,
) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(show_target)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(show_target)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(show_target)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    }
}

/// Initialize the global tracing subscriber.
///
/// Logs to stderr, plus the configured file when `config.file_path` is set.
/// This should be called once at program startup; subsequent calls are
/// silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![fmt_layer(
        config.format,
        std::io::stderr,
        true,
        config.show_target,
    )];

    if let Some(path) = config.file_path.as_ref() {
        let parent = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("warden.log");
        let appender = tracing_appender::rolling::never(parent, file_name);
        layers.push(fmt_layer(config.format, appender, false, config.show_target));
    }

    // Silently ignore if already initialized (idempotent)
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
}
