//! Error types
//!
//! Recoverable failures are typed and propagated with `?`. Logic errors that
//! would leave memory in an unknown state are collected in [`FatalError`] and
//! never returned; they go through [`crate::fatal::abort_with`].

use std::any::Any;
use std::path::PathBuf;

use thiserror::Error;

use crate::bridge::PeerRef;

/// Failures while linking a native object to its host wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("object is already bridged to {existing:?}, refusing {requested:?}")]
    AlreadyBridged { existing: PeerRef, requested: PeerRef },

    #[error("host hooks are already installed for this process")]
    AlreadyInstalled,
}

/// Failures reported by a host when asked for its interpreter lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostLockError {
    #[error("thread '{thread}' is not known to the host runtime")]
    UnrecognizedThread { thread: String },

    #[error("host runtime is not initialized")]
    NotInitialized,
}

/// Failure captured from a task body and delivered to its handle.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("task was dropped before producing a result")]
    Abandoned,
}

impl TaskError {
    /// Build from a payload caught by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("task pool is not initialized")]
    NotInitialized,

    #[error("task pool is already initialized")]
    AlreadyInitialized,

    #[error("cannot wait for tasks while holding the host lock")]
    HostLockHeld,

    #[error("cannot wait for tasks from inside a pool worker")]
    WorkerThread,

    #[error("failed to start worker threads: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Out-of-range narrowing conversion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value {value} does not fit in {target}")]
pub struct RangeError {
    pub value: String,
    pub target: &'static str,
}

/// Logic errors that terminate the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("reference count decremented below zero on {object} at {address:#x}")]
    RefcountUnderflow { object: &'static str, address: usize },

    #[error("reference count overflow on {object} at {address:#x}")]
    RefcountOverflow { object: &'static str, address: usize },

    #[error(transparent)]
    Rebridged(#[from] BridgeError),

    #[error("host lock misuse: {0}")]
    HostLock(#[from] HostLockError),

    #[error("host wrapper {peer:?} is unknown or was already collected")]
    StalePeer { peer: PeerRef },
}
