//! Unified error types for the Quay pipeline.
//!
//! Errors are grouped by the layer that raises them. Routing failures are not
//! errors at all: the dispatcher logs them and resolves to "no processor".

use std::error::Error as StdError;

use thiserror::Error;

/// Boxed error used to carry application failures across the pipeline.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// =============================================================================
// Serialisation Errors
// =============================================================================

/// Errors raised while converting payloads to and from wire bytes.
#[derive(Debug, Clone, Error)]
pub enum SerialisationError {
    /// The message body was empty or contained only whitespace.
    #[error("unable to deserialise message {message_id}: body is empty or whitespace")]
    EmptyBody {
        /// Id of the offending wire message.
        message_id: String,
    },

    /// The body could not be parsed into the expected payload type.
    #[error("unable to deserialise {type_name}: {reason}")]
    Deserialise {
        /// Payload type the body was expected to contain.
        type_name: &'static str,
        /// Parser failure description.
        reason: String,
    },

    /// The payload could not be encoded.
    #[error("unable to serialise {type_name}: {reason}")]
    Serialise {
        /// Payload type that failed to encode.
        type_name: &'static str,
        /// Encoder failure description.
        reason: String,
    },
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors surfaced by a transport receiver or sender.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The lease on a message expired before it was settled.
    #[error("lock lost for message with lock token {lock_token}")]
    LockLost {
        /// The token whose lease was lost.
        lock_token: String,
    },

    /// The entity link has been closed.
    #[error("entity '{entity_path}' is closed")]
    Closed {
        /// Path of the closed entity.
        entity_path: String,
    },

    /// A message callback is already registered on this receiver.
    #[error("a message handler is already registered on '{entity_path}'")]
    HandlerAlreadyRegistered {
        /// Path of the entity.
        entity_path: String,
    },

    /// Sending failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The operation was cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` when the message lease was lost.
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::LockLost { .. })
    }

    /// Returns `true` for cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// =============================================================================
// Handler Errors
// =============================================================================

/// Failure returned by a message handler.
///
/// `Cancelled` is the only variant the processor recovers from locally; it
/// becomes an `Abandoned` result. `Failed` propagates to the listener.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler observed cancellation and stopped cooperatively.
    #[error("operation was cancelled")]
    Cancelled,

    /// The handler failed.
    #[error(transparent)]
    Failed(BoxError),
}

impl HandlerError {
    /// Wraps any error (or message) as a handler failure.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::Failed(err.into())
    }
}

// =============================================================================
// Pipeline Errors
// =============================================================================

/// Errors that escape message processing and reach the transport callback.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The body could not be deserialised.
    #[error(transparent)]
    Serialisation(#[from] SerialisationError),

    /// The handler failed with an error other than cancellation.
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        /// Name of the failing handler.
        handler: String,
        /// The handler's error.
        source: BoxError,
    },

    /// A transport call made by the pipeline failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PipelineError {
    /// Returns `true` when the error represents cancellation rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Cancelled))
    }
}

// =============================================================================
// Outbound Errors
// =============================================================================

/// Errors returned by the sending gateway.
#[derive(Debug, Error)]
pub enum SendError {
    /// A payload could not be serialised; nothing was sent.
    #[error(transparent)]
    Serialisation(#[from] SerialisationError),

    /// The transport rejected the send.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Listener Errors
// =============================================================================

/// Errors from listener lifecycle operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The start token was already cancelled.
    #[error("start of listener '{name}' was cancelled")]
    StartCancelled {
        /// Listener name.
        name: String,
    },

    /// A stopped listener cannot be restarted.
    #[error("listener '{name}' has been stopped and cannot be restarted")]
    AlreadyStopped {
        /// Listener name.
        name: String,
    },

    /// The transport refused the registration or close.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Endpoint Config Errors
// =============================================================================

/// Argument validation failures raised when building endpoint configs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointConfigError {
    /// A required string field was empty or whitespace.
    #[error("{field} cannot be blank")]
    Blank {
        /// Name of the blank field.
        field: &'static str,
    },

    /// Concurrency must allow at least one in-flight callback.
    #[error("max_concurrent_calls cannot be less than one (got {0})")]
    MaxConcurrentCalls(u32),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for serialiser operations.
pub type SerialisationResult<T> = Result<T, SerialisationError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type returned by handlers.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Result type for message processing.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for the sending gateway.
pub type SendResult<T> = Result<T, SendError>;

/// Result type for listener lifecycle operations.
pub type ListenerResult<T> = Result<T, ListenerError>;
