//! The in-memory broker: a registry of entities keyed by path.
//!
//! Every entity gets a dead-letter sub-queue at
//! [`dead_letter_path`](quay_core::dead_letter_path), which is itself an
//! ordinary entity that can be received from.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use quay_core::{
    BoxedReceiver, BoxedSender, DEAD_LETTER_QUEUE_SUFFIX, EndpointConfig, TransportFactory,
    TransportResult, WireMessage, dead_letter_path,
};

use crate::entity::{Entity, EntitySettings};
use crate::receiver::InMemoryReceiver;
use crate::sender::InMemorySender;

/// Endpoint reported by brokers built without an explicit one.
pub const DEFAULT_ENDPOINT: &str = "memory://local";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct BrokerInner {
    endpoint: String,
    settings: EntitySettings,
    poll_interval: Duration,
    entities: Mutex<HashMap<String, Arc<Entity>>>,
}

/// An in-process broker.
///
/// Cloning is cheap; clones share the same entities.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Creates a broker with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder.
    pub fn builder() -> InMemoryBrokerBuilder {
        InMemoryBrokerBuilder::default()
    }

    /// Returns the endpoint name reported by receivers.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Returns the settings applied to every entity.
    pub fn settings(&self) -> EntitySettings {
        self.inner.settings
    }

    /// Opens a receiver on `entity_path`, creating the entity if needed.
    pub fn receiver(&self, entity_path: &str) -> InMemoryReceiver {
        InMemoryReceiver::new(
            self.inner.endpoint.clone(),
            self.entity(entity_path),
            self.inner.poll_interval,
        )
    }

    /// Opens a sender on `entity_path`, creating the entity if needed.
    pub fn sender(&self, entity_path: &str) -> InMemorySender {
        InMemorySender::new(self.entity(entity_path))
    }

    /// Number of messages waiting to be delivered.
    pub fn active_message_count(&self, entity_path: &str) -> usize {
        self.existing(entity_path).map_or(0, |entity| entity.ready_count())
    }

    /// Number of delivered messages not yet settled.
    pub fn locked_message_count(&self, entity_path: &str) -> usize {
        self.existing(entity_path).map_or(0, |entity| entity.locked_count())
    }

    /// Returns the waiting messages of an entity in delivery order.
    pub fn peek(&self, entity_path: &str) -> Vec<WireMessage> {
        self.existing(entity_path)
            .map(|entity| entity.peek())
            .unwrap_or_default()
    }

    /// Returns the messages in `entity_path`'s dead-letter sub-queue.
    pub fn dead_letters(&self, entity_path: &str) -> Vec<WireMessage> {
        self.peek(&dead_letter_path(entity_path))
    }

    fn existing(&self, entity_path: &str) -> Option<Arc<Entity>> {
        let path = entity_path.trim_end_matches('/');
        self.inner.entities.lock().get(path).cloned()
    }

    pub(crate) fn entity(&self, entity_path: &str) -> Arc<Entity> {
        let path = entity_path.trim_end_matches('/');
        let settings = self.inner.settings;
        let mut entities = self.inner.entities.lock();
        if let Some(entity) = entities.get(path) {
            return Arc::clone(entity);
        }

        let entity = if path.ends_with(DEAD_LETTER_QUEUE_SUFFIX) {
            Arc::new(Entity::new(path, settings, None))
        } else {
            let dead_letter_path = dead_letter_path(path);
            let dead_letter = Arc::clone(
                entities
                    .entry(dead_letter_path.clone())
                    .or_insert_with(|| Arc::new(Entity::new(dead_letter_path, settings, None))),
            );
            Arc::new(Entity::new(path, settings, Some(dead_letter)))
        };

        debug!(endpoint = %self.inner.endpoint, entity = path, "Created entity");
        entities.insert(path.to_owned(), Arc::clone(&entity));
        entity
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<String> = self.inner.entities.lock().keys().cloned().collect();
        paths.sort();
        f.debug_struct("InMemoryBroker")
            .field("endpoint", &self.inner.endpoint)
            .field("settings", &self.inner.settings)
            .field("entities", &paths)
            .finish()
    }
}

impl TransportFactory for InMemoryBroker {
    fn receiver(&self, config: &EndpointConfig) -> TransportResult<BoxedReceiver> {
        Ok(Arc::new(InMemoryBroker::receiver(self, config.entity_path())))
    }

    fn sender(&self, config: &EndpointConfig) -> TransportResult<BoxedSender> {
        Ok(Arc::new(InMemoryBroker::sender(self, config.entity_path())))
    }
}

// ─── Builder ────────────────────────────────────────────────────────────────

/// Builder for [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct InMemoryBrokerBuilder {
    endpoint: String,
    settings: EntitySettings,
    poll_interval: Duration,
}

impl Default for InMemoryBrokerBuilder {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            settings: EntitySettings::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl InMemoryBrokerBuilder {
    /// Sets the endpoint name.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets how long a delivered message stays locked without renewal.
    pub fn lock_duration(mut self, duration: Duration) -> Self {
        self.settings.lock_duration = duration;
        self
    }

    /// Sets the deliveries allowed before a message is dead-lettered.
    ///
    /// Values below one are raised to one.
    pub fn max_delivery_count(mut self, count: u32) -> Self {
        self.settings.max_delivery_count = count.max(1);
        self
    }

    /// Sets how often an idle pump re-checks for scheduled messages.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builds the broker.
    pub fn build(self) -> InMemoryBroker {
        InMemoryBroker {
            inner: Arc::new(BrokerInner {
                endpoint: self.endpoint,
                settings: self.settings,
                poll_interval: self.poll_interval,
                entities: Mutex::new(HashMap::new()),
            }),
        }
    }
}
