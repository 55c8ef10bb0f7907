//! Wire message shapes and the outbound message envelope.
//!
//! [`WireMessage`] is what travels over a transport. Inbound messages arrive as
//! [`ReceivedMessage`], which adds the broker-assigned [`SystemProperties`]
//! (lock token, delivery count, sequence number, enqueue time).
//!
//! ```text
//! OutboundMessage<T> ──serialise──▶ WireMessage ──send──▶ broker
//!                                                           │
//! Handler ◀── MessageContext + T ◀──deserialise── ReceivedMessage
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::properties::UserProperties;

/// Default user property carrying the payload type tag.
pub const DEFAULT_MESSAGE_TYPE_PROPERTY: &str = "Quay.EnclosedMessageType";

// =============================================================================
// Message Types
// =============================================================================

/// A payload type that can travel through the pipeline.
///
/// `TYPE_NAME` is the stable, fully-qualified identifier written to the type
/// tag property by the sending gateway and read back by the dispatcher. It is
/// usually generated with `#[derive(MessageType)]`.
pub trait MessageType: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Fully-qualified type identifier.
    const TYPE_NAME: &'static str;
}

// =============================================================================
// Wire Message
// =============================================================================

/// A transport-level message: body bytes plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    /// Serialised payload.
    pub body: Vec<u8>,
    /// Application properties.
    pub user_properties: UserProperties,
    /// Message identifier. Defaults to a fresh UUID.
    pub message_id: String,
    /// Correlation identifier.
    pub correlation_id: Option<String>,
    /// Application label (subject).
    pub label: Option<String>,
    /// MIME content type of the body.
    pub content_type: Option<String>,
    /// Address to reply to.
    pub reply_to: Option<String>,
    /// Session to reply to.
    pub reply_to_session_id: Option<String>,
    /// Session identifier.
    pub session_id: Option<String>,
    /// Partition key.
    pub partition_key: Option<String>,
    /// Partition key used when sending via a transfer entity.
    pub via_partition_key: Option<String>,
    /// Time to live. `None` means the entity default.
    pub time_to_live: Option<Duration>,
    /// Earliest time the message becomes visible.
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,
}

impl WireMessage {
    /// Creates a message with the given body and transport defaults.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            user_properties: UserProperties::new(),
            message_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            label: None,
            content_type: None,
            reply_to: None,
            reply_to_session_id: None,
            session_id: None,
            partition_key: None,
            via_partition_key: None,
            time_to_live: None,
            scheduled_enqueue_time: None,
        }
    }
}

// =============================================================================
// Received Message
// =============================================================================

/// Opaque handle for a message's temporary lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Wraps a transport-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Broker-assigned properties of a delivered message.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemProperties {
    /// Lease handle used to settle the message.
    pub lock_token: LockToken,
    /// Number of deliveries so far, starting at 1.
    pub delivery_count: u32,
    /// Broker sequence number.
    pub sequence_number: i64,
    /// When the broker accepted the message.
    pub enqueued_time: DateTime<Utc>,
}

/// A message delivered by a transport receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// The wire message as sent.
    pub message: WireMessage,
    /// Delivery metadata.
    pub system: SystemProperties,
}

impl ReceivedMessage {
    /// Returns the lock token.
    pub fn lock_token(&self) -> &LockToken {
        &self.system.lock_token
    }

    /// Returns the user properties.
    pub fn user_properties(&self) -> &UserProperties {
        &self.message.user_properties
    }

    /// Returns when the message expires, if it has a time to live.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = self.message.time_to_live?;
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        self.system.enqueued_time.checked_add_signed(ttl)
    }
}

// =============================================================================
// Outbound Message
// =============================================================================

/// A payload plus the wire attributes to stamp on it when sent.
///
/// Optional attributes are only copied onto the wire message when present.
#[derive(Debug, Clone)]
pub struct OutboundMessage<T> {
    /// The payload.
    pub payload: T,
    /// Properties merged into the wire message.
    pub user_properties: UserProperties,
    pub message_id: Option<String>,
    pub partition_key: Option<String>,
    pub via_partition_key: Option<String>,
    pub session_id: Option<String>,
    pub reply_to_session_id: Option<String>,
    pub time_to_live: Option<Duration>,
    pub correlation_id: Option<String>,
    pub label: Option<String>,
    pub content_type: Option<String>,
    pub reply_to: Option<String>,
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,
}

impl<T> OutboundMessage<T> {
    /// Creates an outbound message with no optional attributes.
    pub fn new(payload: T) -> Self {
        Self::from_entity(payload, None)
    }

    /// Creates an outbound message with optional user properties.
    pub fn from_entity(payload: T, user_properties: Option<UserProperties>) -> Self {
        Self {
            payload,
            user_properties: user_properties.unwrap_or_default(),
            message_id: None,
            partition_key: None,
            via_partition_key: None,
            session_id: None,
            reply_to_session_id: None,
            time_to_live: None,
            correlation_id: None,
            label: None,
            content_type: None,
            reply_to: None,
            scheduled_enqueue_time: None,
        }
    }

    /// Adds a user property.
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<crate::PropertyValue>,
    ) -> Self {
        self.user_properties.insert(key.into(), value.into());
        self
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the partition key.
    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Sets the via-partition key.
    pub fn with_via_partition_key(mut self, key: impl Into<String>) -> Self {
        self.via_partition_key = Some(key.into());
        self
    }

    /// Sets the session id.
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Sets the reply-to session id.
    pub fn with_reply_to_session_id(mut self, id: impl Into<String>) -> Self {
        self.reply_to_session_id = Some(id.into());
        self
    }

    /// Sets the time to live.
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the reply-to address.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Delays delivery until `at`.
    pub fn with_scheduled_enqueue_time(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_enqueue_time = Some(at);
        self
    }

    /// Stamps the present optional attributes onto `message`.
    ///
    /// Blank string attributes count as absent.
    pub fn apply_attributes(&self, message: &mut WireMessage) {
        fn present(value: &Option<String>) -> Option<String> {
            value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
        }

        if let Some(id) = present(&self.message_id) {
            message.message_id = id;
        }
        if let Some(key) = present(&self.partition_key) {
            message.partition_key = Some(key);
        }
        if let Some(key) = present(&self.via_partition_key) {
            message.via_partition_key = Some(key);
        }
        if let Some(id) = present(&self.session_id) {
            message.session_id = Some(id);
        }
        if let Some(id) = present(&self.reply_to_session_id) {
            message.reply_to_session_id = Some(id);
        }
        if let Some(id) = present(&self.correlation_id) {
            message.correlation_id = Some(id);
        }
        if let Some(label) = present(&self.label) {
            message.label = Some(label);
        }
        if let Some(content_type) = present(&self.content_type) {
            message.content_type = Some(content_type);
        }
        if let Some(reply_to) = present(&self.reply_to) {
            message.reply_to = Some(reply_to);
        }
        if let Some(ttl) = self.time_to_live {
            message.time_to_live = Some(ttl);
        }
        if let Some(at) = self.scheduled_enqueue_time {
            message.scheduled_enqueue_time = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wire_message_gets_unique_id() {
        let a = WireMessage::new(b"{}".to_vec());
        let b = WireMessage::new(b"{}".to_vec());
        assert!(!a.message_id.is_empty());
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_absent_attributes_keep_transport_defaults() {
        let mut wire = WireMessage::new(Vec::new());
        wire.time_to_live = Some(Duration::from_secs(60));
        let original_id = wire.message_id.clone();

        OutboundMessage::new(()).apply_attributes(&mut wire);

        assert_eq!(wire.message_id, original_id);
        assert_eq!(wire.time_to_live, Some(Duration::from_secs(60)));
        assert!(wire.correlation_id.is_none());
    }

    #[test]
    fn test_present_attributes_are_copied() {
        let mut wire = WireMessage::new(Vec::new());
        OutboundMessage::new(())
            .with_message_id("m-1")
            .with_session_id("s-1")
            .with_label("orders")
            .with_partition_key("  ")
            .with_time_to_live(Duration::from_secs(5))
            .apply_attributes(&mut wire);

        assert_eq!(wire.message_id, "m-1");
        assert_eq!(wire.session_id.as_deref(), Some("s-1"));
        assert_eq!(wire.label.as_deref(), Some("orders"));
        assert!(wire.partition_key.is_none());
        assert_eq!(wire.time_to_live, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_expiry_follows_time_to_live() {
        let enqueued = Utc::now();
        let mut wire = WireMessage::new(Vec::new());
        let received = |wire: WireMessage| ReceivedMessage {
            message: wire,
            system: SystemProperties {
                lock_token: LockToken::new("t"),
                delivery_count: 1,
                sequence_number: 1,
                enqueued_time: enqueued,
            },
        };
        assert!(received(wire.clone()).expires_at().is_none());

        wire.time_to_live = Some(Duration::from_secs(30));
        assert_eq!(
            received(wire).expires_at(),
            Some(enqueued + chrono::Duration::seconds(30))
        );
    }
}
