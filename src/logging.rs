//! Logging and tracing setup for usb-backup.
//!
//! Builds a `tracing` subscriber with a console layer (pretty or JSON) and an
//! optional plain-text log file. The subscriber is never installed globally;
//! [`init`] hands back a [`LogHandle`] that the orchestrator installs for the
//! duration of one run.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{Dispatch, Level, dispatcher::DefaultGuard};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};

/// Configuration for the logging system.
#[derive(Debug, Default, Clone)]
pub struct LogConfig {
    /// Output console logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
    /// Also append plain-text logs to this file
    pub file: Option<PathBuf>,
}

/// Owned logging context for one backup run.
#[derive(Clone)]
pub struct LogHandle {
    dispatch: Dispatch,
}

impl LogHandle {
    /// A handle that drops every event. Used by tests and library callers that
    /// bring their own subscriber.
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    /// Make this handle the default subscriber for the current thread until the
    /// returned guard is dropped.
    pub fn enter(&self) -> DefaultGuard {
        tracing::dispatcher::set_default(&self.dispatch)
    }
}

/// Build the subscriber described by `config`.
///
/// The log level can be overridden at runtime via the `RUST_LOG` environment variable.
pub fn init(config: &LogConfig) -> Result<LogHandle> {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "usb_backup={}",
            default_level.as_str().to_lowercase()
        ))
    });

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.json {
        layers.push(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    if let Some(path) = &config.file {
        let file = open_log_file(path)?;
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    let subscriber = tracing_subscriber::registry().with(layers).with(env_filter);

    Ok(LogHandle {
        dispatch: Dispatch::new(subscriber),
    })
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}
