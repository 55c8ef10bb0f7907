//! Read-only message metadata handed to handlers.

use chrono::{DateTime, Utc};

use crate::message::ReceivedMessage;
use crate::properties::UserProperties;

/// A snapshot of a delivered message's metadata.
///
/// Handlers receive this instead of the wire message, so they can never
/// settle a message themselves. The snapshot is copied before the wire message
/// is used for acknowledgement and lives only for one processing call.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageContext {
    /// Application properties.
    pub user_properties: UserProperties,
    /// Scheduled enqueue time, if the message was scheduled.
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,
    /// Application label.
    pub label: Option<String>,
    /// Correlation identifier.
    pub correlation_id: Option<String>,
    /// Message identifier.
    pub message_id: String,
    /// Expiry time, if the message has a time to live.
    pub expires_at: Option<DateTime<Utc>>,
    /// Delivery attempt, starting at 1.
    pub delivery_count: u32,
    /// Broker sequence number.
    pub sequence_number: i64,
    /// When the broker accepted the message.
    pub enqueued_time: DateTime<Utc>,
}

impl MessageContext {
    /// Copies the metadata off a delivered message.
    pub fn from_received(message: &ReceivedMessage) -> Self {
        Self {
            user_properties: message.message.user_properties.clone(),
            scheduled_enqueue_time: message.message.scheduled_enqueue_time,
            label: message.message.label.clone(),
            correlation_id: message.message.correlation_id.clone(),
            message_id: message.message.message_id.clone(),
            expires_at: message.expires_at(),
            delivery_count: message.system.delivery_count,
            sequence_number: message.system.sequence_number,
            enqueued_time: message.system.enqueued_time,
        }
    }

    /// Returns `true` if this is a redelivery.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

impl From<&ReceivedMessage> for MessageContext {
    fn from(message: &ReceivedMessage) -> Self {
        Self::from_received(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{LockToken, SystemProperties, WireMessage};

    #[test]
    fn test_snapshot_copies_metadata() {
        let mut wire = WireMessage::new(b"{}".to_vec());
        wire.label = Some("orders".into());
        wire.correlation_id = Some("corr".into());
        wire.user_properties.insert("tenant".into(), "acme".into());
        let received = ReceivedMessage {
            message: wire.clone(),
            system: SystemProperties {
                lock_token: LockToken::new("lock"),
                delivery_count: 2,
                sequence_number: 42,
                enqueued_time: Utc::now(),
            },
        };

        let ctx = MessageContext::from(&received);

        assert_eq!(ctx.message_id, wire.message_id);
        assert_eq!(ctx.label.as_deref(), Some("orders"));
        assert_eq!(ctx.correlation_id.as_deref(), Some("corr"));
        assert_eq!(ctx.sequence_number, 42);
        assert!(ctx.is_redelivery());
        assert_eq!(
            ctx.user_properties.get("tenant").and_then(|v| v.as_str()),
            Some("acme")
        );
    }
}
