//! Transport seam: the receiver and sender a broker client must provide.
//!
//! The pipeline never talks to a broker directly. A listener registers a
//! [`MessageCallback`] on a [`MessageReceiver`] and settles messages through
//! it; a gateway hands finished [`WireMessage`]s to a [`MessageSender`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::endpoint::EndpointConfig;
use crate::error::{PipelineError, PipelineResult, TransportResult};
use crate::message::{LockToken, ReceivedMessage, WireMessage};
use crate::properties::UserProperties;

// =============================================================================
// Callbacks
// =============================================================================

/// Per-message callback invoked by a receiver.
///
/// An `Err` tells the receiver the message was not settled; the receiver
/// reports it through [`MessageHandlerOptions::on_error`].
pub type MessageCallback =
    Arc<dyn Fn(ReceivedMessage) -> BoxFuture<'static, PipelineResult<()>> + Send + Sync>;

/// Error callback invoked by a receiver for failures outside the caller's
/// control flow.
pub type ErrorCallback = Arc<dyn Fn(ExceptionReceived) + Send + Sync>;

/// What the receiver was doing when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionAction {
    UserCallback,
    Receive,
    Complete,
    Abandon,
    DeadLetter,
    RenewLock,
}

impl fmt::Display for ExceptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UserCallback => "UserCallback",
            Self::Receive => "Receive",
            Self::Complete => "Complete",
            Self::Abandon => "Abandon",
            Self::DeadLetter => "DeadLetter",
            Self::RenewLock => "RenewLock",
        };
        f.write_str(s)
    }
}

/// An error reported by a receiver.
#[derive(Debug)]
pub struct ExceptionReceived {
    pub error: PipelineError,
    pub action: ExceptionAction,
    pub endpoint: String,
    pub entity_path: String,
}

/// Options passed when registering a message callback.
#[derive(Clone)]
pub struct MessageHandlerOptions {
    /// Settle successful callbacks automatically.
    pub auto_complete: bool,
    /// Upper bound on in-flight callbacks. Always at least 1.
    pub max_concurrent_calls: u32,
    /// How long the receiver keeps renewing a message lease.
    pub max_auto_renew_duration: Duration,
    /// Receives errors from the receive loop and from failed callbacks.
    pub on_error: ErrorCallback,
}

impl fmt::Debug for MessageHandlerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandlerOptions")
            .field("auto_complete", &self.auto_complete)
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .field("max_auto_renew_duration", &self.max_auto_renew_duration)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Receiver / Sender
// =============================================================================

/// The receiving side of a broker entity.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Returns the broker endpoint this receiver is bound to.
    fn endpoint(&self) -> &str;

    /// Returns the entity path.
    fn entity_path(&self) -> &str;

    /// Returns `true` once [`close`](Self::close) has been requested.
    fn is_closed_or_closing(&self) -> bool;

    /// Starts delivering messages to `callback`.
    ///
    /// Only one callback may be registered per receiver.
    fn register_message_handler(
        &self,
        callback: MessageCallback,
        options: MessageHandlerOptions,
    ) -> TransportResult<()>;

    /// Removes the message from the entity.
    async fn complete(&self, lock_token: &LockToken) -> TransportResult<()>;

    /// Releases the lease so the message can be redelivered.
    async fn abandon(
        &self,
        lock_token: &LockToken,
        properties: &UserProperties,
    ) -> TransportResult<()>;

    /// Moves the message to the dead-letter sub-queue.
    async fn dead_letter(
        &self,
        lock_token: &LockToken,
        properties: &UserProperties,
    ) -> TransportResult<()>;

    /// Stops delivery and closes the link.
    async fn close(&self) -> TransportResult<()>;
}

/// The sending side of a broker entity.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Returns the entity path messages are sent to.
    fn path(&self) -> &str;

    /// Sends one message.
    async fn send(&self, message: WireMessage) -> TransportResult<()>;

    /// Sends several messages in one call.
    async fn send_batch(&self, messages: Vec<WireMessage>) -> TransportResult<()>;
}

/// Shared receiver handle.
pub type BoxedReceiver = Arc<dyn MessageReceiver>;

/// Shared sender handle.
pub type BoxedSender = Arc<dyn MessageSender>;

/// Creates transport clients for an endpoint.
pub trait TransportFactory: Send + Sync {
    /// Opens a receiver for `config`'s entity.
    fn receiver(&self, config: &EndpointConfig) -> TransportResult<BoxedReceiver>;

    /// Opens a sender for `config`'s entity.
    fn sender(&self, config: &EndpointConfig) -> TransportResult<BoxedSender>;
}
