//! Type-tag routing from a delivered message to its processor.
//!
//! The [`ProcessorRegistry`] is built once at startup, one processor per
//! message type, and passed to a [`PropertyDispatcher`]. The dispatcher reads
//! the type tag property from each message and looks it up:
//!
//! ```rust,ignore
//! let registry = ProcessorRegistry::new()
//!     .with(Processor::new(OrderPlacedHandler))
//!     .with(Processor::new(OrderCancelledHandler));
//!
//! let dispatcher = PropertyDispatcher::new(registry);
//! ```
//!
//! Routing failures never raise errors. They are logged and resolve to
//! `None`; the listener decides what happens to the message.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{error, trace, warn};

use quay_core::{DEFAULT_MESSAGE_TYPE_PROPERTY, EventId, PropertyValue, ReceivedMessage};

use crate::processor::{BoxedProcessor, MessageProcessor};

/// Selects the processor for a delivered message.
pub trait ProcessorDispatcher: Send + Sync {
    /// Returns the processor for `message`, or `None` if it cannot be routed.
    fn select_processor(&self, message: &ReceivedMessage) -> Option<BoxedProcessor>;
}

/// Shared dispatcher handle.
pub type BoxedDispatcher = Arc<dyn ProcessorDispatcher>;

// =============================================================================
// Registry
// =============================================================================

/// Processors keyed by the message type they accept.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<&'static str, BoxedProcessor>,
}

impl ProcessorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Registers a processor under its message type.
    ///
    /// Returns the processor it replaced, if any.
    pub fn register<P>(&mut self, processor: P) -> Option<BoxedProcessor>
    where
        P: MessageProcessor + 'static,
    {
        self.register_boxed(Arc::new(processor))
    }

    /// Registers an already shared processor.
    pub fn register_boxed(&mut self, processor: BoxedProcessor) -> Option<BoxedProcessor> {
        let message_type = processor.message_type();
        let replaced = self.processors.insert(message_type, processor);
        if replaced.is_some() {
            warn!(message_type, "Replaced the processor registered for message type");
        }
        replaced
    }

    /// Registers a processor (builder pattern).
    pub fn with<P>(mut self, processor: P) -> Self
    where
        P: MessageProcessor + 'static,
    {
        self.register(processor);
        self
    }

    /// Returns the processor for a message type.
    pub fn get(&self, message_type: &str) -> Option<BoxedProcessor> {
        self.processors.get(message_type).cloned()
    }

    /// Returns `true` if a processor is registered for `message_type`.
    pub fn contains(&self, message_type: &str) -> bool {
        self.processors.contains_key(message_type)
    }

    /// Returns the registered message types.
    pub fn message_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.processors.keys().copied()
    }

    /// Number of registered processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.processors.keys().collect();
        types.sort();
        f.debug_struct("ProcessorRegistry")
            .field("message_types", &types)
            .finish()
    }
}

// =============================================================================
// Property Dispatcher
// =============================================================================

/// Routes by the value of a single user property.
#[derive(Debug, Clone)]
pub struct PropertyDispatcher {
    property_name: String,
    registry: Arc<ProcessorRegistry>,
}

impl PropertyDispatcher {
    /// Creates a dispatcher reading [`DEFAULT_MESSAGE_TYPE_PROPERTY`].
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self::with_property_name(registry, DEFAULT_MESSAGE_TYPE_PROPERTY)
    }

    /// Creates a dispatcher reading a custom type tag property.
    ///
    /// The name must match the one the sending side stamps.
    pub fn with_property_name(
        registry: ProcessorRegistry,
        property_name: impl Into<String>,
    ) -> Self {
        Self {
            property_name: property_name.into(),
            registry: Arc::new(registry),
        }
    }

    /// Name of the user property carrying the type tag.
    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    /// Returns the processor registry.
    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }
}

impl ProcessorDispatcher for PropertyDispatcher {
    fn select_processor(&self, message: &ReceivedMessage) -> Option<BoxedProcessor> {
        let message_id = message.message.message_id.as_str();

        let Some(value) = message.user_properties().get(self.property_name.as_str()) else {
            error!(
                event_id = EventId::ProcessorDispatcherMissingType.code(),
                message_id,
                property = %self.property_name,
                "Message has no type tag property"
            );
            return None;
        };

        let message_type = match value {
            PropertyValue::String(s) if !s.trim().is_empty() => s.trim(),
            other => {
                error!(
                    event_id = EventId::ProcessorDispatcherMissingType.code(),
                    message_id,
                    property = %self.property_name,
                    value = %other,
                    "Type tag property is blank or not a type name"
                );
                return None;
            }
        };

        match self.registry.get(message_type) {
            Some(processor) => {
                trace!(message_id, message_type, "Selected processor");
                Some(processor)
            }
            None => {
                error!(
                    event_id = EventId::ProcessorDispatcherMissingType.code(),
                    message_id,
                    message_type,
                    "No processor registered for message type"
                );
                None
            }
        }
    }
}
