//! Runtime error types.

use thiserror::Error;

use quay_core::ListenerError;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors raised by [`ListenerHost`](crate::host::ListenerHost).
#[derive(Error, Debug)]
pub enum HostError {
    /// Two listeners were registered under one name.
    #[error("a listener named '{0}' is already registered")]
    DuplicateListener(String),

    /// A listener failed to start.
    #[error("listener '{name}' failed to start: {source}")]
    Start {
        name: String,
        #[source]
        source: ListenerError,
    },

    /// The shutdown signal handler could not be installed.
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
