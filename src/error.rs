//! Error types for roost.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chat transport errors.
///
/// These are surfaced to the reasoning engine as typed tool failures so it
/// can reason about them instead of retrying blindly.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is not ready")]
    NotReady,

    #[error("Channel {channel_id} not found")]
    ChannelNotFound { channel_id: String },

    #[error("Missing permission for channel {channel_id}")]
    Forbidden { channel_id: String },

    #[error("Invalid id: {value}")]
    InvalidId { value: String },

    #[error("Message {message_id} not found")]
    MessageNotFound { message_id: String },

    #[error("Send to {channel_id} failed: {reason}")]
    SendFailed { channel_id: String, reason: String },

    #[error("Transport {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Transport request failed: {0}")]
    Request(String),
}

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid job {name}: {reason}")]
    InvalidJob { name: String, reason: String },

    #[error("Invalid trigger '{expr}': {reason}")]
    InvalidTrigger { expr: String, reason: String },

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Failed to parse job file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasoning engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No reasoning engine configured")]
    NotConfigured,

    #[error("Failed to spawn engine: {0}")]
    Spawn(String),

    #[error("Engine protocol error: {0}")]
    Protocol(String),

    #[error("Engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine exited before finishing the turn: {0}")]
    Exited(String),

    #[error("Turn halted by the send-loop breaker")]
    Halted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Journal and memory block storage errors.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

/// Post-turn synchronization errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The send-loop breaker stopped the turn.
    #[error("Send loop halted after {streak} near-duplicate sends")]
    LoopHalted { streak: usize },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Turn panicked: {0}")]
    Panicked(String),
}

impl TurnError {
    /// Whether this is the deliberate loop-safety stop.
    pub fn is_loop_halt(&self) -> bool {
        matches!(self, TurnError::LoopHalted { .. })
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
