//! Sending client for in-memory entities.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use quay_core::{MessageSender, TransportResult, WireMessage};

use crate::entity::Entity;

/// Sending client for one in-memory entity.
///
/// A batch is enqueued atomically and keeps its order.
pub struct InMemorySender {
    entity: Arc<Entity>,
}

impl InMemorySender {
    pub(crate) fn new(entity: Arc<Entity>) -> Self {
        Self { entity }
    }
}

impl fmt::Debug for InMemorySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySender")
            .field("path", &self.entity.path())
            .finish()
    }
}

#[async_trait]
impl MessageSender for InMemorySender {
    fn path(&self) -> &str {
        self.entity.path()
    }

    async fn send(&self, message: WireMessage) -> TransportResult<()> {
        trace!(entity = %self.entity.path(), message_id = %message.message_id, "Sending message");
        self.entity.enqueue(vec![message]);
        Ok(())
    }

    async fn send_batch(&self, messages: Vec<WireMessage>) -> TransportResult<()> {
        trace!(entity = %self.entity.path(), count = messages.len(), "Sending batch");
        self.entity.enqueue(messages);
        Ok(())
    }
}
