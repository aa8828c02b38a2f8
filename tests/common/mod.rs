//! Common test utilities with tracing setup.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     // ... test code with tracing::info!, tracing::debug!, etc.
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Filter directives (e.g., `masstree_core=debug`)
//! - `MASSTREE_CORE_LOG_DIR`: Log directory (default: `logs/`)
//! - `MASSTREE_CORE_LOG_CONSOLE`: Set to "0" to disable console output
//!
//! Library events (lock contention, full bags) are only emitted when the
//! crate is built with `--features tracing`.
//!
//! # Log Files
//!
//! Logs are written to `logs/masstree_core.jsonl` as newline-delimited JSON.
//!
//! ```bash
//! cat logs/masstree_core.jsonl | jq 'select(.level == "WARN")'
//! ```

#![allow(dead_code)]

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Ensures tracing is only initialized once across all tests.
static INIT: Once = Once::new();

/// Initialize the tracing subscriber with file and console logging.
///
/// Safe to call multiple times - only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(setup_tracing);
}

/// Configuration for tracing setup.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Directory for log files.
    pub log_dir: PathBuf,
    /// Log file name.
    pub log_file: String,
    /// Enable console output.
    pub console_enabled: bool,
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file: "masstree_core.jsonl".to_string(),
            console_enabled: true,
            default_level: Level::INFO,
        }
    }
}

impl TracingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("MASSTREE_CORE_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if env::var("MASSTREE_CORE_LOG_CONSOLE").is_ok_and(|v| v == "0") {
            config.console_enabled = false;
        }

        config
    }
}

/// Create an EnvFilter from RUST_LOG or use default level.
fn make_filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("{default_level}")))
}

fn setup_tracing() {
    let config = TracingConfig::from_env();

    let console_layer = config.console_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .compact()
            .with_filter(make_filter(config.default_level))
    });

    // A missing log directory only loses the file layer.
    let file_layer = std::fs::create_dir_all(&config.log_dir)
        .and_then(|()| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(config.log_dir.join(&config.log_file))
        })
        .ok()
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_thread_ids(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(make_filter(config.default_level))
        });

    let _ = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}
