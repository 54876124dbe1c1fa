//! Error types for the tempo concurrency core

use crate::event_loop::watcher::WatcherId;
use thiserror::Error;

/// Main error type for tempo
///
/// Errors are `Clone` because a single failure can fan out to every
/// continuation registered on a promise and to the terminal state of a
/// stream at the same time.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// An argument was rejected by a driver or stream operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A watcher operation referenced an unknown or cancelled watcher id
    #[error("{0} is not a valid watcher identifier")]
    InvalidWatcher(WatcherId),

    /// The installed poller cannot provide the requested capability
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// `resolve` or `fail` was called on a deferred that has already settled
    #[error("deferred has already been settled")]
    AlreadySettled,

    /// `complete`, `fail`, or `emit` was called on a stream that has already
    /// completed; carries the captured first-completion backtrace when the
    /// debug aid is enabled
    #[error("stream has already been completed{}", match first_completion {
        Some(trace) => format!("; first completed at:\n{}", trace),
        None => String::new(),
    })]
    AlreadyComplete {
        /// Backtrace of the first completion, captured when `TEMPO_DEBUG` is set
        first_completion: Option<String>,
    },

    /// `advance` was called while a prior `advance` promise was still pending
    #[error("advance() called while a prior advance is still pending")]
    OverlappedAdvance,

    /// `current` was called on an exhausted iterator
    #[error("stream iteration has already completed")]
    Completed,

    /// `current` was called before a promise returned from `advance` settled
    #[error("no value is ready at the current position")]
    NotReady,

    /// A producer observed that its consumer handle has been dropped
    #[error("stream consumer has been disposed")]
    Disposed,

    /// A loop passthrough was invoked with no driver installed
    #[error("no event loop driver is installed on this thread")]
    NoDriver,

    /// Generic failure value carried by promises and streams on behalf of
    /// user code
    #[error("{0}")]
    Failure(String),
}

impl Error {
    /// Create an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Create an invalid-watcher error for the given id
    pub fn invalid_watcher(id: WatcherId) -> Self {
        Error::InvalidWatcher(id)
    }

    /// Create an unsupported-feature error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedFeature(message.into())
    }

    /// Create an already-complete error without a captured backtrace
    pub fn already_complete() -> Self {
        Error::AlreadyComplete {
            first_completion: None,
        }
    }

    /// Create a generic failure value
    pub fn failure(message: impl Into<String>) -> Self {
        Error::Failure(message.into())
    }

    /// Returns `true` if this error marks a disposed stream consumer
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed)
    }
}

/// Result type alias for tempo
pub type Result<T> = std::result::Result<T, Error>;
