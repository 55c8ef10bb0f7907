//! # Quay Transport
//!
//! An in-process broker implementing the transport seam defined in
//! `quay-core`.
//!
//! The broker keeps queue semantics close to a hosted message broker so the
//! pipeline can be run and tested without one:
//!
//! - Peek-lock delivery with per-message [`LockToken`](quay_core::LockToken)s
//! - Lock expiry, lock renewal and redelivery with increasing delivery counts
//! - A dead-letter sub-queue per entity, fed explicitly or when the delivery
//!   count reaches its limit
//! - Scheduled enqueue times and time-to-live expiry
//! - A message pump bounded by `max_concurrent_calls`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  quay-framework     │  (listener, gateway)
//! ├─────────────────────┤
//! │  quay-core          │  (MessageReceiver / MessageSender traits)
//! ├─────────────────────┤
//! │  quay-transport     │  <- This crate (in-memory broker)
//! ├─────────────────────┤
//! │  Entities (queues)  │
//! └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quay_transport::InMemoryBroker;
//!
//! let broker = InMemoryBroker::builder()
//!     .lock_duration(Duration::from_secs(30))
//!     .build();
//!
//! let sender = broker.sender("orders");
//! let receiver = broker.receiver("orders");
//! ```
//!
//! [`InMemoryBroker`] also implements
//! [`TransportFactory`](quay_core::TransportFactory), so it can be handed to
//! anything that opens clients from an endpoint config.

mod broker;
mod entity;
mod receiver;
mod sender;

pub use broker::{DEFAULT_ENDPOINT, InMemoryBroker, InMemoryBrokerBuilder};
pub use entity::{DEAD_LETTER_REASON_PROPERTY, EntitySettings, MAX_DELIVERY_COUNT_EXCEEDED};
pub use receiver::InMemoryReceiver;
pub use sender::InMemorySender;
