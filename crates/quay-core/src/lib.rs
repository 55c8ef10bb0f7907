//! # Quay Core
//!
//! Message model and seams for the Quay message pipeline.
//!
//! This crate holds everything the pipeline exchanges but none of its control
//! flow:
//!
//! - **Data model**: [`HandlingResult`], [`MessageContext`], [`WireMessage`],
//!   [`ReceivedMessage`], [`OutboundMessage`]
//! - **Payloads**: the [`MessageType`] trait and the [`MessageSerialiser`]
//!   with its JSON implementation
//! - **Handlers**: the [`MessageHandler`] trait and [`handler_fn`]
//! - **Seams**: [`MessageReceiver`], [`MessageSender`] and [`Instrumentor`]
//! - **Configuration**: validated [`EndpointConfig`] and
//!   [`EndpointHandlingConfig`]
//!
//! ## Message Flow
//!
//! ```text
//!                 ┌────────────┐   ┌───────────┐   ┌─────────┐
//! receiver ──────▶│  Listener  │──▶│ Processor │──▶│ Handler │
//!    ▲            └────────────┘   └───────────┘   └─────────┘
//!    │ complete /        │               │              │
//!    │ abandon /         ◀──────── HandlingResult ◀─────┘
//!    └─ dead-letter ─────┘
//! ```
//!
//! The listener, processor, dispatcher and sending gateway live in
//! `quay-framework`.

pub mod context;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod handler;
pub mod instrumentation;
pub mod message;
pub mod properties;
pub mod result;
pub mod serialiser;
pub mod transport;

pub use context::MessageContext;
pub use endpoint::{
    DEAD_LETTER_QUEUE_SUFFIX, EndpointConfig, EndpointHandlingConfig,
    EndpointHandlingConfigBuilder, dead_letter_path,
};
pub use error::{
    BoxError, EndpointConfigError, HandlerError, HandlerResult, ListenerError, ListenerResult,
    PipelineError, PipelineResult, SendError, SendResult, SerialisationError,
    SerialisationResult, TransportError, TransportResult,
};
pub use events::EventId;
pub use handler::{FnHandler, MessageHandler, handler_fn, short_type_name};
pub use instrumentation::{
    BoxedInstrumentor, DependencyTelemetry, ElapsedTelemetry, Instrumentor, RequestTelemetry,
    VoidInstrumentor, void_instrumentor,
};
pub use message::{
    DEFAULT_MESSAGE_TYPE_PROPERTY, LockToken, MessageType, OutboundMessage, ReceivedMessage,
    SystemProperties, WireMessage,
};
pub use properties::{PropertyValue, UserProperties};
pub use result::{Cause, HandlingOutcome, HandlingResult, keys};
pub use serialiser::{JsonMessageSerialiser, MessageSerialiser};
pub use transport::{
    BoxedReceiver, BoxedSender, ErrorCallback, ExceptionAction, ExceptionReceived,
    MessageCallback, MessageHandlerOptions, MessageReceiver, MessageSender, TransportFactory,
};

pub use futures::future::BoxFuture;
pub use tokio_util::sync::CancellationToken;
