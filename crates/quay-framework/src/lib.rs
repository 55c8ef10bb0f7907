//! # Quay Framework
//!
//! The dispatch-process-acknowledge pipeline.
//!
//! - [`Processor`]: deserialises a delivered message, runs its handler and
//!   classifies the outcome
//! - [`PropertyDispatcher`]: picks the processor for a message from its type
//!   tag, using an explicit [`ProcessorRegistry`]
//! - [`MessageListener`]: owns a receiver subscription and turns each
//!   [`HandlingResult`](quay_core::HandlingResult) into complete, abandon or
//!   dead-letter
//! - [`SendingGateway`]: serialises, tags and sends payloads, singly or in
//!   batches
//!
//! ## Example
//!
//! ```rust,ignore
//! use quay_framework::{MessageListener, Processor, ProcessorRegistry, PropertyDispatcher};
//!
//! let registry = ProcessorRegistry::new()
//!     .with(Processor::new(OrderPlacedHandler))
//!     .with(Processor::new(OrderShippedHandler));
//!
//! let listener = MessageListener::multi_type(
//!     handling_config,
//!     receiver,
//!     Arc::new(PropertyDispatcher::new(registry)),
//! );
//! listener.start_listening(shutdown.child_token())?;
//! ```

pub mod dispatcher;
pub mod gateway;
pub mod listener;
pub mod processor;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{BoxedDispatcher, ProcessorDispatcher, ProcessorRegistry, PropertyDispatcher};
pub use gateway::{DEPENDENCY_TYPE, SendingGateway};
pub use listener::{
    ListenerBuilder, ListenerState, MessageListener, ProcessorSource, UNMAPPED_PROCESSOR_REASON,
};
pub use processor::{BoxedProcessor, MessageProcessor, Processor};
