//! Core error types for cotimer-core.
//!
//! Engine operations never panic for expected conditions: every failure is a
//! [`TimerError`] value. State-machine violations are ordinary control flow
//! for concurrent multi-user access, while [`StoreError`] covers the
//! infrastructure underneath and surfaces as [`TimerError::Unavailable`].

use std::path::PathBuf;
use thiserror::Error;

use crate::timer::{TimerId, UserId};

/// Failure kinds returned by the timer session engine.
#[derive(Error, Debug)]
pub enum TimerError {
    /// Caller is neither the owner nor, where allowed, a member.
    #[error("caller is not allowed to perform this operation")]
    NotAuthorized,

    #[error("timer is already running")]
    AlreadyRunning,

    #[error("timer has no running phase to pause")]
    NotPausable,

    #[error("timer is not paused")]
    NotPaused,

    #[error("user {0} is not a member of this timer")]
    NotAMember(UserId),

    #[error("timer is not waiting for confirmation")]
    NotWaitingForConfirmation,

    #[error("timer {0} not found")]
    TimerNotFound(TimerId),

    #[error("invalid settings: {0}")]
    InvalidSettings(#[source] ValidationError),

    #[error("invalid timer name: {0}")]
    InvalidName(#[source] ValidationError),

    #[error("the timer owner cannot be removed from the timer")]
    CannotRemoveOwner,

    /// Optimistic re-validation failed twice in a row.
    #[error("timer {0} was modified concurrently, retry the operation")]
    Conflict(TimerId),

    /// A collaborator (store) failed; callers may retry.
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] StoreError),
}

impl TimerError {
    /// Stable identifier for the failure kind, used by outer transports.
    pub fn code(&self) -> &'static str {
        match self {
            TimerError::NotAuthorized => "not_authorized",
            TimerError::AlreadyRunning => "already_running",
            TimerError::NotPausable => "not_pausable",
            TimerError::NotPaused => "not_paused",
            TimerError::NotAMember(_) => "not_a_member",
            TimerError::NotWaitingForConfirmation => "not_waiting_for_confirmation",
            TimerError::TimerNotFound(_) => "timer_not_found",
            TimerError::InvalidSettings(_) => "invalid_settings",
            TimerError::InvalidName(_) => "invalid_name",
            TimerError::CannotRemoveOwner => "cannot_remove_owner",
            TimerError::Conflict(_) => "conflict",
            TimerError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<StoreError> for TimerError {
    fn from(err: StoreError) -> Self {
        TimerError::Unavailable(err)
    }
}

/// Session and membership store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("timer {0} already exists")]
    AlreadyExists(TimerId),

    #[error("timer {0} does not exist in the store")]
    NotFound(TimerId),

    /// Compare-and-swap save lost against a concurrent writer.
    #[error("version mismatch for timer {timer_id}: expected {expected}, found {found}")]
    VersionMismatch {
        timer_id: TimerId,
        expected: u64,
        found: u64,
    },

    #[error("Query failed: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("refusing to store invalid data: {0}")]
    Invalid(#[from] ValidationError),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("unknown config key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivery failures reported by a publisher. Never roll back a mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("no subscribers are listening")]
    NoSubscribers,

    #[error("publisher is closed")]
    Closed,
}

/// Validation errors for value objects (settings, names).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for TimerError
pub type Result<T, E = TimerError> = std::result::Result<T, E>;
