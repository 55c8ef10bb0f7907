//! The outbound side: typed payloads to wire messages to a sender.
//!
//! Every entry point shares one build routine: serialise the payload, copy
//! the present optional attributes, merge the caller's properties and stamp
//! the type tag property with [`MessageType::TYPE_NAME`]. That tag is what a
//! [`PropertyDispatcher`](crate::PropertyDispatcher) on the receiving side
//! routes by, so both must use the same property name.
//!
//! A batch is always one transport call and one telemetry event, however
//! many messages it carries.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error};

use quay_core::{
    BoxedInstrumentor, BoxedSender, DEFAULT_MESSAGE_TYPE_PROPERTY, DependencyTelemetry, EventId,
    JsonMessageSerialiser, MessageSerialiser, MessageType, OutboundMessage, PropertyValue,
    SendError, SendResult, SerialisationResult, TransportResult, UserProperties, WireMessage,
    void_instrumentor,
};

/// Dependency type reported for broker sends.
pub const DEPENDENCY_TYPE: &str = "MessageBroker";

/// Sends typed payloads to one entity.
pub struct SendingGateway<S = JsonMessageSerialiser> {
    sender: BoxedSender,
    serialiser: Arc<S>,
    instrumentor: BoxedInstrumentor,
    type_property: String,
}

impl SendingGateway {
    /// Creates a gateway using the JSON serialiser.
    pub fn new(sender: BoxedSender) -> Self {
        Self::with_serialiser(sender, JsonMessageSerialiser)
    }
}

impl<S: MessageSerialiser> SendingGateway<S> {
    /// Creates a gateway with a specific serialiser.
    pub fn with_serialiser(sender: BoxedSender, serialiser: S) -> Self {
        Self {
            sender,
            serialiser: Arc::new(serialiser),
            instrumentor: void_instrumentor(),
            type_property: DEFAULT_MESSAGE_TYPE_PROPERTY.to_string(),
        }
    }

    /// Sets the instrumentor that receives dependency telemetry.
    pub fn instrumentor(mut self, instrumentor: BoxedInstrumentor) -> Self {
        self.instrumentor = instrumentor;
        self
    }

    /// Sets the property the type tag is written to.
    pub fn message_type_property(mut self, name: impl Into<String>) -> Self {
        self.type_property = name.into();
        self
    }

    /// Returns the entity path of the underlying sender.
    pub fn path(&self) -> &str {
        self.sender.path()
    }

    /// Sends one payload with optional user properties.
    pub async fn send<M: MessageType>(
        &self,
        payload: M,
        properties: Option<UserProperties>,
    ) -> SendResult<()> {
        let message = OutboundMessage::from_entity(payload, properties.clone());
        self.send_single(message, properties.as_ref()).await
    }

    /// Sends one outbound message.
    ///
    /// Its user properties, if any, are reported with the dependency telemetry.
    pub async fn send_message<M: MessageType>(
        &self,
        message: OutboundMessage<M>,
    ) -> SendResult<()> {
        let properties =
            (!message.user_properties.is_empty()).then(|| message.user_properties.clone());
        self.send_single(message, properties.as_ref()).await
    }

    async fn send_single<M: MessageType>(
        &self,
        message: OutboundMessage<M>,
        properties: Option<&UserProperties>,
    ) -> SendResult<()> {
        let wire = self.build_message(message)?;
        let message_id = wire.message_id.clone();

        let timestamp = Utc::now();
        let started = Instant::now();
        let sent = self.sender.send(wire).await;
        let elapsed = started.elapsed();
        self.report(sent, "send")?;

        self.instrumentor.track_dependency(DependencyTelemetry {
            event_id: EventId::OutboundGatewayMeasuredElapsedSingle,
            elapsed,
            timestamp,
            dependency_type: DEPENDENCY_TYPE,
            target: self.sender.path(),
            name: "send",
            data: Some(message_id.as_str()),
            is_successful: true,
            properties,
        });
        debug!(
            event_id = EventId::OutboundGatewaySentSingle.code(),
            entity_path = self.sender.path(),
            message_type = M::TYPE_NAME,
            message_id = %message_id,
            "Sent message"
        );
        Ok(())
    }

    /// Sends several payloads in one batch, each with a copy of `properties`.
    pub async fn send_multiple<M, I>(
        &self,
        payloads: I,
        properties: Option<UserProperties>,
    ) -> SendResult<()>
    where
        M: MessageType,
        I: IntoIterator<Item = M>,
    {
        let messages = payloads
            .into_iter()
            .map(|payload| OutboundMessage::from_entity(payload, properties.clone()));
        self.send_batch(messages, properties.as_ref()).await
    }

    /// Sends several outbound messages in one batch.
    ///
    /// Nothing is sent if any payload fails to serialise.
    pub async fn send_messages<M, I>(&self, messages: I) -> SendResult<()>
    where
        M: MessageType,
        I: IntoIterator<Item = OutboundMessage<M>>,
    {
        self.send_batch(messages, None).await
    }

    async fn send_batch<M, I>(
        &self,
        messages: I,
        properties: Option<&UserProperties>,
    ) -> SendResult<()>
    where
        M: MessageType,
        I: IntoIterator<Item = OutboundMessage<M>>,
    {
        let batch = messages
            .into_iter()
            .map(|message| self.build_message(message))
            .collect::<SerialisationResult<Vec<_>>>()?;

        if batch.is_empty() {
            debug!(entity_path = self.sender.path(), "Empty batch; nothing sent");
            return Ok(());
        }
        let count = batch.len();

        let timestamp = Utc::now();
        let started = Instant::now();
        let sent = self.sender.send_batch(batch).await;
        let elapsed = started.elapsed();
        self.report(sent, "send_multiple")?;

        self.instrumentor.track_dependency(DependencyTelemetry {
            event_id: EventId::OutboundGatewayMeasuredElapsedMultiple,
            elapsed,
            timestamp,
            dependency_type: DEPENDENCY_TYPE,
            target: self.sender.path(),
            name: "send_multiple",
            data: None,
            is_successful: true,
            properties,
        });
        debug!(
            event_id = EventId::OutboundGatewaySentMultiple.code(),
            entity_path = self.sender.path(),
            message_type = M::TYPE_NAME,
            count,
            "Sent message batch"
        );
        Ok(())
    }

    /// Builds the wire message for `message` without sending it.
    pub fn build_message<M: MessageType>(
        &self,
        message: OutboundMessage<M>,
    ) -> SerialisationResult<WireMessage> {
        let body = self.serialiser.serialise(&message.payload)?;
        let mut wire = WireMessage::new(body);
        message.apply_attributes(&mut wire);
        wire.user_properties.extend(message.user_properties);
        wire.user_properties.insert(
            self.type_property.clone(),
            PropertyValue::from(M::TYPE_NAME),
        );
        Ok(wire)
    }

    fn report(&self, sent: TransportResult<()>, operation: &str) -> SendResult<()> {
        sent.map_err(|e| {
            error!(
                event_id = EventId::OutboundGatewayException.code(),
                entity_path = self.sender.path(),
                operation,
                error = %e,
                "Failed to send"
            );
            SendError::Transport(e)
        })
    }
}

impl<S> fmt::Debug for SendingGateway<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendingGateway")
            .field("path", &self.sender.path())
            .field("type_property", &self.type_property)
            .finish_non_exhaustive()
    }
}
