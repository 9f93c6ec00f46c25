//! Logging setup and secret redaction
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | `watchlist_scanner=info` | Log level filter |
//! | `LOG_FORMAT` | `json` | Output format: `json` or `pretty` |
//!
//! Logs go to stderr so that command output on stdout (e.g. `watchlist list`)
//! stays machine readable.

use std::env;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt as ts_fmt, prelude::*, EnvFilter};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Default log level when neither `RUST_LOG` nor `--log-level` is set
pub const DEFAULT_LOG_LEVEL: &str = "watchlist_scanner=info";

/// Wrapper for secrets that must never be logged in full.
///
/// Values longer than 8 characters keep their first 4; shorter ones are
/// fully redacted.
///
/// ```rust,ignore
/// tracing::info!(api_key = %SanitizedValue::new(&key), "Authenticating");
/// // api_key = "AKFZ...REDACTED"
/// ```
#[derive(Clone)]
pub struct SanitizedValue<'a>(&'a str);

impl<'a> SanitizedValue<'a> {
    pub fn new(value: &'a str) -> Self {
        Self(value)
    }
}

impl fmt::Display for SanitizedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get(..4) {
            Some(prefix) if self.0.len() > 8 => write!(f, "{}...REDACTED", prefix),
            _ => write!(f, "REDACTED"),
        }
    }
}

impl fmt::Debug for SanitizedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SanitizedValue(***)")
    }
}

/// Log line encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// Anything other than "pretty" (any case) means JSON
    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("pretty") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Filter and format for the global subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// EnvFilter directive (e.g. "watchlist_scanner=debug")
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LoggingConfig {
    /// Read `RUST_LOG` and `LOG_FORMAT`
    pub fn from_env() -> Self {
        Self {
            filter: env::var("RUST_LOG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            format: env::var("LOG_FORMAT").map(|v| LogFormat::parse(&v)).unwrap_or_default(),
        }
    }

    /// Apply a `--log-level` override.
    ///
    /// A bare level ("debug") is scoped to this crate; anything containing
    /// `=` or `,` is taken as a full filter directive.
    pub fn with_level(mut self, level: Option<&str>) -> Self {
        if let Some(level) = level.map(str::trim).filter(|l| !l.is_empty()) {
            self.filter = if level.contains('=') || level.contains(',') {
                level.to_string()
            } else {
                format!("watchlist_scanner={}", level.to_lowercase())
            };
        }
        self
    }
}

/// Install the global subscriber; later calls are no-ops
pub fn init_logging_with_config(config: LoggingConfig) {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let env_filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let layer = match config.format {
        LogFormat::Json => ts_fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .boxed(),
        LogFormat::Pretty => ts_fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
    };

    tracing_subscriber::registry().with(env_filter).with(layer).init();
}
