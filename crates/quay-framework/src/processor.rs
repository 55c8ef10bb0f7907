//! Per-message-type processing: deserialise, invoke, classify.
//!
//! A [`Processor`] is bound to one payload type `M` and one handler. It turns
//! a delivered message into a [`HandlingResult`]:
//!
//! 1. The body is deserialised with the processor's serialiser. A malformed
//!    body is a [`PipelineError::Serialisation`]; a body that reads as "no
//!    value" becomes `UnrecognisedMessageType`.
//! 2. The handler runs with a [`MessageContext`] snapshot and the pipeline's
//!    cancellation token. When it returns a result, its wall-clock time is
//!    reported as elapsed telemetry under the handler's name.
//! 3. [`HandlerError::Cancelled`] becomes `Abandoned`. Any other handler error
//!    propagates to the listener.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, warn};

use quay_core::{
    BoxedInstrumentor, ElapsedTelemetry, EndpointHandlingConfig, EventId, HandlerError,
    HandlingResult, JsonMessageSerialiser, MessageContext, MessageHandler, MessageSerialiser,
    MessageType, PipelineError, PipelineResult, ReceivedMessage, void_instrumentor,
};

/// Type-erased processor, as seen by listeners and dispatchers.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Type tag of the payload this processor accepts.
    fn message_type(&self) -> &'static str;

    /// Name of the handler this processor invokes.
    fn handler_name(&self) -> &str;

    /// Processes one delivered message.
    async fn process_message(
        &self,
        message: &ReceivedMessage,
        config: &EndpointHandlingConfig,
        cancellation: CancellationToken,
    ) -> PipelineResult<HandlingResult>;
}

/// Shared processor handle.
pub type BoxedProcessor = Arc<dyn MessageProcessor>;

/// Processor for payload type `M`, handled by `H`, decoded by `S`.
pub struct Processor<M, H, S = JsonMessageSerialiser> {
    handler: Arc<H>,
    serialiser: Arc<S>,
    instrumentor: BoxedInstrumentor,
    _message: PhantomData<fn() -> M>,
}

impl<M, H> Processor<M, H>
where
    M: MessageType,
    H: MessageHandler<M>,
{
    /// Creates a processor using the JSON serialiser.
    pub fn new(handler: H) -> Self {
        Self::with_serialiser(handler, JsonMessageSerialiser)
    }
}

impl<M, H, S> Processor<M, H, S>
where
    M: MessageType,
    H: MessageHandler<M>,
    S: MessageSerialiser,
{
    /// Creates a processor with a specific serialiser.
    pub fn with_serialiser(handler: H, serialiser: S) -> Self {
        Self {
            handler: Arc::new(handler),
            serialiser: Arc::new(serialiser),
            instrumentor: void_instrumentor(),
            _message: PhantomData,
        }
    }

    /// Sets the instrumentor that receives handler elapsed times.
    pub fn instrumentor(mut self, instrumentor: BoxedInstrumentor) -> Self {
        self.instrumentor = instrumentor;
        self
    }

    /// Erases the payload type.
    pub fn boxed(self) -> BoxedProcessor {
        Arc::new(self)
    }

    async fn process(
        &self,
        message: &ReceivedMessage,
        cancellation: CancellationToken,
    ) -> PipelineResult<HandlingResult> {
        let Some(payload) = self.serialiser.deserialise::<M>(&message.message)? else {
            let details = format!(
                "Message body did not contain a value of type {}",
                M::TYPE_NAME
            );
            warn!(message_type = M::TYPE_NAME, "{details}");
            return Ok(HandlingResult::unrecognised_message_type(
                details,
                Some(message.user_properties().clone()),
            ));
        };

        let context = MessageContext::from_received(message);
        let handler_name = self.handler.name();

        let started = Instant::now();
        let outcome = self.handler.handle(payload, context, cancellation).await;

        match outcome {
            Ok(result) => {
                self.instrumentor.track_elapsed(ElapsedTelemetry {
                    event_id: EventId::HandlerMeasuredElapsed,
                    elapsed: started.elapsed(),
                    name: handler_name,
                    properties: Some(message.user_properties()),
                });
                debug!(handler = handler_name, outcome = %result.outcome(), "Handler finished");
                Ok(result)
            }
            Err(HandlerError::Cancelled) => {
                warn!(
                    event_id = EventId::ProcessorCancelled.code(),
                    handler = handler_name,
                    "Handler was cancelled; abandoning message"
                );
                Ok(HandlingResult::abandoned_with_error(
                    &HandlerError::Cancelled,
                    Some(message.user_properties().clone()),
                ))
            }
            Err(HandlerError::Failed(source)) => {
                error!(
                    event_id = EventId::HandlerException.code(),
                    handler = handler_name,
                    error = %source,
                    "Handler failed"
                );
                Err(PipelineError::Handler {
                    handler: handler_name.to_string(),
                    source,
                })
            }
        }
    }
}

#[async_trait]
impl<M, H, S> MessageProcessor for Processor<M, H, S>
where
    M: MessageType,
    H: MessageHandler<M>,
    S: MessageSerialiser,
{
    fn message_type(&self) -> &'static str {
        M::TYPE_NAME
    }

    fn handler_name(&self) -> &str {
        self.handler.name()
    }

    async fn process_message(
        &self,
        message: &ReceivedMessage,
        config: &EndpointHandlingConfig,
        cancellation: CancellationToken,
    ) -> PipelineResult<HandlingResult> {
        let span = debug_span!(
            "process_message",
            message_type = M::TYPE_NAME,
            message_id = %message.message.message_id,
            entity_path = config.entity_path(),
        );
        self.process(message, cancellation).instrument(span).await
    }
}

impl<M, H, S> fmt::Debug for Processor<M, H, S>
where
    M: MessageType,
    H: MessageHandler<M>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("message_type", &M::TYPE_NAME)
            .field("handler", &self.handler.name())
            .finish_non_exhaustive()
    }
}
