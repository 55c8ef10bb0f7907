//! # Quay
//!
//! A typed dispatch-process-acknowledge pipeline for brokered messages.
//!
//! ## Overview
//!
//! Messages arrive from a broker as opaque bytes with a set of properties.
//! Quay turns them into typed payloads, runs a handler for each, and settles
//! the message with the broker according to what the handler reported.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐     ┌──────────┐     ┌────────────┐     ┌───────────┐     ┌─────────┐
//! │ Receiver │────▶│ Listener │────▶│ Dispatcher │────▶│ Processor │────▶│ Handler │
//! │ (broker) │◀────│          │     │ (by type)  │     │ (decode)  │     └─────────┘
//! └──────────┘     └──────────┘     └────────────┘     └───────────┘
//!    complete / abandon / dead-letter
//! ```
//!
//! - **Listener**: owns the subscription, settles every delivery
//! - **Dispatcher**: maps the message type property to a processor
//! - **Processor**: deserialises, times and invokes the handler
//! - **Gateway**: the sending side; tags payloads with their type
//! - **Host**: starts listeners and stops them on shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quay::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, MessageType)]
//! #[message_type(crate = "quay::core")]
//! struct OrderPlaced {
//!     order_id: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = InMemoryBroker::new();
//!     let config = EndpointHandlingConfig::with_defaults(
//!         EndpointConfig::new(broker.endpoint(), "orders")?,
//!     );
//!
//!     let processor = Processor::<OrderPlaced, _>::new(handler_fn(
//!         |order: OrderPlaced, _ctx, _cancel| async move {
//!             println!("order {}", order.order_id);
//!             Ok(HandlingResult::completed(None))
//!         },
//!     ));
//!
//!     let host = ListenerHost::new().with_listener(MessageListener::single_type(
//!         config,
//!         Arc::new(broker.receiver("orders")),
//!         processor.boxed(),
//!     ))?;
//!
//!     host.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use quay_core as core;
pub use quay_framework as framework;
pub use quay_runtime as runtime;
pub use quay_transport as transport;

pub use quay_macros::MessageType;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use quay::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Hosting
    pub use quay_runtime::{ListenerHost, TracingInstrumentor};

    // Pipeline
    pub use quay_framework::{
        MessageListener, Processor, ProcessorRegistry, PropertyDispatcher, SendingGateway,
    };

    // Handlers and results
    pub use quay_core::{
        CancellationToken, HandlerError, HandlingResult, MessageContext, MessageHandler,
        UserProperties, handler_fn,
    };

    // Endpoints
    pub use quay_core::{EndpointConfig, EndpointHandlingConfig};

    // Message types: the trait and its derive share a name
    pub use quay_core::MessageType;
    pub use quay_macros::MessageType;

    // Development broker
    pub use quay_transport::InMemoryBroker;
}
