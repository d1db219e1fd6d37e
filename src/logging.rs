//! Tracing setup.
//!
//! Human-readable output goes to stdout. Every record is also appended as
//! one JSON object per line to `logs/events.jsonl` in the agent home.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::RepoLayout;
use crate::error::ConfigError;

/// The events log is rolled at startup once it grows past this size.
pub const EVENTS_LOG_ROLL_BYTES: u64 = 1_000_000;

const DEFAULT_FILTER: &str = "roost=info";

/// Rename `path` to `<path>.<UTC timestamp>` if it is larger than
/// `max_bytes`. Returns the new path when the file was rolled.
pub fn roll_if_large(path: &Path, max_bytes: u64) -> Result<Option<PathBuf>, ConfigError> {
    let size = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if size <= max_bytes {
        return Ok(None);
    }

    let suffix = Utc::now().format("%Y%m%dT%H%M%SZ");
    let mut rolled = path.as_os_str().to_owned();
    rolled.push(format!(".{suffix}"));
    let rolled = PathBuf::from(rolled);
    std::fs::rename(path, &rolled).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(rolled))
}

/// Install the global subscriber. Calling it twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init(layout: &RepoLayout) -> Result<(), ConfigError> {
    let events_log = layout.events_log();
    let rolled = roll_if_large(&events_log, EVENTS_LOG_ROLL_BYTES)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&events_log)
        .map_err(|source| ConfigError::Read {
            path: events_log.clone(),
            source,
        })?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).compact();
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(json_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Logging to {}", events_log.display());
    }
    if let Some(rolled) = rolled {
        tracing::info!("Rolled previous events log to {}", rolled.display());
    }
    Ok(())
}
