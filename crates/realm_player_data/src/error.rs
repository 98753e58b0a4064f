//! Persistence and session error types.

use crate::PlayerId;
use std::io::Error as IoError;
use std::path::PathBuf;

/// Failures while reading or writing persistent player state.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {0}: {1}")]
    Io(PathBuf, IoError),

    #[error("Failed to serialize {kind} for player {player}: {source}")]
    Serialization {
        kind: &'static str,
        player: PlayerId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to deserialize {kind} for player {player}: {source}")]
    Deserialization {
        kind: &'static str,
        player: PlayerId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Work executor is closed")]
    ExecutorClosed,

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Session-level conditions surfaced to gameplay code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("No active session for player {0}")]
    NoActiveSession(PlayerId),

    /// The player's data is still loading; callers should ask them to wait.
    #[error("Session for player {0} is still loading")]
    StillLoading(PlayerId),

    /// The player's previous session is still saving; the rejoin should be
    /// retried once it finishes.
    #[error("Previous session for player {0} is still saving")]
    StillSaving(PlayerId),

    #[error("Required fragment {domain} failed to load for player {player}: {reason}")]
    LoadFailed {
        player: PlayerId,
        domain: &'static str,
        reason: String,
    },
}

/// Errors returned by the player data service.
#[derive(Debug, thiserror::Error)]
pub enum PlayerDataError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Saving {domains:?} failed for player {player}; an operator alert was raised")]
    SaveFailed {
        player: PlayerId,
        domains: Vec<&'static str>,
    },

    #[error("A domain for fragment {0} is already registered")]
    DuplicateDomain(&'static str),

    #[error("Player data service has been drained")]
    Drained,
}
