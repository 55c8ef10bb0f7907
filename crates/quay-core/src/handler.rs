//! Application handlers for typed messages.
//!
//! A handler receives the deserialised payload, a [`MessageContext`] snapshot
//! and the pipeline's cancellation token, and returns a [`HandlingResult`].
//! Long-running handlers should watch the token and return
//! [`HandlerError::Cancelled`] when it fires; the processor turns that into an
//! `Abandoned` result so the message is redelivered.
//!
//! # Example
//!
//! ```rust,ignore
//! use quay_core::{handler_fn, HandlingResult, MessageContext};
//!
//! let handler = handler_fn(|order: OrderPlaced, ctx: MessageContext, _ct| async move {
//!     println!("order {} (delivery {})", order.id, ctx.delivery_count);
//!     Ok(HandlingResult::completed(None))
//! })
//! .named("OrderPlacedHandler");
//! ```

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::MessageContext;
use crate::error::HandlerResult;
use crate::message::MessageType;
use crate::result::HandlingResult;

/// Business logic for one message type.
#[async_trait]
pub trait MessageHandler<M: MessageType>: Send + Sync + 'static {
    /// Handles one message.
    async fn handle(
        &self,
        message: M,
        context: MessageContext,
        cancellation: CancellationToken,
    ) -> HandlerResult<HandlingResult>;

    /// Identity used in telemetry. Defaults to the short type name.
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }
}

/// Returns the last path segment of a type name, without generic arguments.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ============================================================================
// Function handlers
// ============================================================================

/// A handler backed by an async closure. Created with [`handler_fn`].
#[derive(Clone)]
pub struct FnHandler<F> {
    name: &'static str,
    f: F,
}

impl<F> FnHandler<F> {
    /// Sets the name reported in telemetry.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

/// Adapts an async closure into a [`MessageHandler`].
pub fn handler_fn<M, F, Fut>(f: F) -> FnHandler<F>
where
    M: MessageType,
    F: Fn(M, MessageContext, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<HandlingResult>> + Send + 'static,
{
    FnHandler {
        name: "handler_fn",
        f,
    }
}

#[async_trait]
impl<M, F, Fut> MessageHandler<M> for FnHandler<F>
where
    M: MessageType,
    F: Fn(M, MessageContext, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<HandlingResult>> + Send + 'static,
{
    async fn handle(
        &self,
        message: M,
        context: MessageContext,
        cancellation: CancellationToken,
    ) -> HandlerResult<HandlingResult> {
        (self.f)(message, context, cancellation).await
    }

    fn name(&self) -> &str {
        self.name
    }
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}
