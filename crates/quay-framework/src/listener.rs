//! The listener: subscription lifecycle and acknowledgement.
//!
//! A [`MessageListener`] owns one transport receiver. Starting it registers a
//! per-message callback; every delivered message then goes through:
//!
//! ```text
//! ReceivedMessage
//!   │
//!   ├─ (multi-type) dispatcher ── none ──▶ dead-letter "Unmapped message processor"
//!   │
//!   ▼
//! processor ──▶ HandlingResult
//!   │
//!   ├─ auto-complete or closing ──▶ no acknowledgement
//!   ├─ Completed ─────────────────▶ complete
//!   ├─ DeadLettered / Unrecognised ▶ dead-letter(properties)
//!   └─ Abandoned ─────────────────▶ abandon(properties)
//!   │
//!   ▼
//! request telemetry
//! ```
//!
//! The single-type and multi-type variants share one state machine and
//! differ only in where the processor comes from ([`ProcessorSource`]).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use quay_core::{
    BoxFuture, BoxedInstrumentor, BoxedReceiver, EndpointHandlingConfig, ErrorCallback, EventId,
    ExceptionReceived, HandlingOutcome, HandlingResult, ListenerError, ListenerResult,
    MessageCallback, MessageHandlerOptions, PipelineError, PipelineResult, ReceivedMessage,
    RequestTelemetry, TransportResult, void_instrumentor,
};

use crate::dispatcher::BoxedDispatcher;
use crate::processor::BoxedProcessor;

/// Dead-letter reason for messages no processor is registered for.
pub const UNMAPPED_PROCESSOR_REASON: &str = "Unmapped message processor";

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerState {
    /// Created, not yet listening.
    Idle,
    /// Callback registered with the receiver.
    Listening,
    /// Closing the receiver.
    Stopping,
    /// Closed. A stopped listener cannot be restarted.
    Stopped,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Where a listener gets the processor for each message.
#[derive(Clone)]
pub enum ProcessorSource {
    /// Every message goes to the same processor.
    Fixed(BoxedProcessor),
    /// The dispatcher picks a processor per message.
    Dispatched(BoxedDispatcher),
}

impl fmt::Debug for ProcessorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(processor) => f
                .debug_tuple("Fixed")
                .field(&processor.message_type())
                .finish(),
            Self::Dispatched(_) => f.debug_tuple("Dispatched").finish(),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`MessageListener`].
pub struct ListenerBuilder {
    config: EndpointHandlingConfig,
    receiver: BoxedReceiver,
    instrumentor: BoxedInstrumentor,
    name: Option<String>,
}

impl ListenerBuilder {
    /// Sets the listener name used in logs. Defaults to one derived from the
    /// entity path and message type.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the instrumentor that receives request telemetry.
    pub fn instrumentor(mut self, instrumentor: BoxedInstrumentor) -> Self {
        self.instrumentor = instrumentor;
        self
    }

    /// Builds a listener that sends every message to `processor`.
    pub fn single_type(self, processor: BoxedProcessor) -> MessageListener {
        let default_name = format!(
            "{}[{}]",
            self.config.entity_path(),
            processor.message_type()
        );
        self.build(default_name, ProcessorSource::Fixed(processor))
    }

    /// Builds a listener that routes each message through `dispatcher`.
    pub fn multi_type(self, dispatcher: BoxedDispatcher) -> MessageListener {
        let default_name = format!("{}[*]", self.config.entity_path());
        self.build(default_name, ProcessorSource::Dispatched(dispatcher))
    }

    fn build(self, default_name: String, source: ProcessorSource) -> MessageListener {
        MessageListener {
            inner: Arc::new(Inner {
                name: self.name.unwrap_or(default_name),
                config: self.config,
                receiver: self.receiver,
                source,
                instrumentor: self.instrumentor,
                state: Mutex::new(ListenerState::Idle),
            }),
        }
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Drives one receiver: registers the callback and acknowledges results.
///
/// Cloning is cheap and yields a handle to the same listener.
#[derive(Clone)]
pub struct MessageListener {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: EndpointHandlingConfig,
    receiver: BoxedReceiver,
    source: ProcessorSource,
    instrumentor: BoxedInstrumentor,
    state: Mutex<ListenerState>,
}

impl MessageListener {
    /// Starts a builder.
    pub fn builder(config: EndpointHandlingConfig, receiver: BoxedReceiver) -> ListenerBuilder {
        ListenerBuilder {
            config,
            receiver,
            instrumentor: void_instrumentor(),
            name: None,
        }
    }

    /// Creates a single-type listener with default settings.
    pub fn single_type(
        config: EndpointHandlingConfig,
        receiver: BoxedReceiver,
        processor: BoxedProcessor,
    ) -> Self {
        Self::builder(config, receiver).single_type(processor)
    }

    /// Creates a multi-type listener with default settings.
    pub fn multi_type(
        config: EndpointHandlingConfig,
        receiver: BoxedReceiver,
        dispatcher: BoxedDispatcher,
    ) -> Self {
        Self::builder(config, receiver).multi_type(dispatcher)
    }

    /// Returns the listener name used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the handling config.
    pub fn config(&self) -> &EndpointHandlingConfig {
        &self.inner.config
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ListenerState {
        *self.inner.state.lock()
    }

    /// Returns `true` while listening.
    pub fn is_listening(&self) -> bool {
        self.state() == ListenerState::Listening
    }

    /// Registers the message and error callbacks with the receiver.
    ///
    /// `cancellation` is the pipeline-wide token handed to every handler.
    /// Starting an already listening listener is a no-op.
    pub fn start_listening(&self, cancellation: CancellationToken) -> ListenerResult<()> {
        let inner = &self.inner;
        if cancellation.is_cancelled() {
            return Err(ListenerError::StartCancelled {
                name: inner.name.clone(),
            });
        }

        let mut state = inner.state.lock();
        match *state {
            ListenerState::Idle => {}
            ListenerState::Listening => {
                warn!(listener = %inner.name, "Listener is already listening");
                return Ok(());
            }
            ListenerState::Stopping | ListenerState::Stopped => {
                return Err(ListenerError::AlreadyStopped {
                    name: inner.name.clone(),
                });
            }
        }

        let options = MessageHandlerOptions {
            auto_complete: inner.config.auto_complete(),
            max_concurrent_calls: inner.config.max_concurrent_calls(),
            max_auto_renew_duration: inner.config.max_lock_renewal(),
            on_error: Inner::error_callback(&inner.name),
        };
        inner
            .receiver
            .register_message_handler(Inner::message_callback(inner, cancellation), options)?;
        *state = ListenerState::Listening;
        drop(state);

        info!(
            event_id = EventId::ListenerStarted.code(),
            listener = %inner.name,
            endpoint = inner.receiver.endpoint(),
            entity_path = inner.receiver.entity_path(),
            max_concurrent_calls = inner.config.max_concurrent_calls(),
            auto_complete = inner.config.auto_complete(),
            "Listener started"
        );
        Ok(())
    }

    /// Closes the receiver.
    ///
    /// In-flight callbacks are not cancelled or awaited. Stopping a listener
    /// that never started, or has already stopped, does nothing.
    pub async fn stop_listening(&self) -> ListenerResult<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            match *state {
                ListenerState::Listening => *state = ListenerState::Stopping,
                current => {
                    debug!(listener = %inner.name, state = %current, "Listener is not listening");
                    return Ok(());
                }
            }
        }

        let closed = if inner.receiver.is_closed_or_closing() {
            Ok(())
        } else {
            inner.receiver.close().await
        };
        *inner.state.lock() = ListenerState::Stopped;

        match &closed {
            Ok(()) => info!(
                event_id = EventId::ListenerFinished.code(),
                listener = %inner.name,
                "Listener stopped"
            ),
            Err(e) => error!(
                event_id = EventId::ListenerException.code(),
                listener = %inner.name,
                error = %e,
                "Listener stopped; closing the receiver failed"
            ),
        }
        closed.map_err(ListenerError::from)
    }
}

impl Inner {
    fn message_callback(self: &Arc<Self>, cancellation: CancellationToken) -> MessageCallback {
        let inner = Arc::clone(self);
        Arc::new(
            move |message: ReceivedMessage| -> BoxFuture<'static, PipelineResult<()>> {
                let inner = Arc::clone(&inner);
                let cancellation = cancellation.clone();
                let span = info_span!(
                    "handle_message",
                    listener = %inner.name,
                    message_id = %message.message.message_id,
                    delivery_count = message.system.delivery_count,
                );
                Box::pin(
                    async move { inner.handle_message(message, cancellation).await }
                        .instrument(span),
                )
            },
        )
    }

    fn error_callback(name: &str) -> ErrorCallback {
        let name = name.to_string();
        Arc::new(move |exception: ExceptionReceived| {
            if exception.error.is_cancellation() {
                warn!(
                    event_id = EventId::ListenerCancelled.code(),
                    listener = %name,
                    action = %exception.action,
                    entity_path = %exception.entity_path,
                    "Receiver operation was cancelled"
                );
            } else {
                error!(
                    event_id = EventId::ListenerException.code(),
                    listener = %name,
                    action = %exception.action,
                    endpoint = %exception.endpoint,
                    entity_path = %exception.entity_path,
                    error = %exception.error,
                    "Receiver reported an error"
                );
            }
        })
    }

    async fn handle_message(
        &self,
        message: ReceivedMessage,
        cancellation: CancellationToken,
    ) -> PipelineResult<()> {
        let started = Instant::now();
        let timestamp = Utc::now();

        let processor = match &self.source {
            ProcessorSource::Fixed(processor) => Arc::clone(processor),
            ProcessorSource::Dispatched(dispatcher) => {
                match dispatcher.select_processor(&message) {
                    Some(processor) => processor,
                    None => return self.dead_letter_unmapped(&message).await,
                }
            }
        };

        let result = match processor
            .process_message(&message, &self.config, cancellation)
            .await
        {
            Ok(result) => result,
            Err(err @ PipelineError::Handler { .. }) if self.dead_letters_failures() => {
                error!(
                    event_id = EventId::ListenerException.code(),
                    handler = processor.handler_name(),
                    error = %err,
                    "Unhandled error processing message; dead-lettering"
                );
                HandlingResult::dead_lettered_with_error(
                    &err,
                    Some(message.user_properties().clone()),
                )
            }
            Err(err) => {
                error!(
                    event_id = EventId::ProcessorException.code(),
                    handler = processor.handler_name(),
                    error = %err,
                    "Error processing message"
                );
                return Err(err);
            }
        };

        if self.config.auto_complete() || self.receiver.is_closed_or_closing() {
            debug!(outcome = %result.outcome(), "Acknowledgement left to the receiver");
        } else {
            self.acknowledge(&message, &result).await?;
        }

        self.instrumentor.track_request(RequestTelemetry {
            event_id: EventId::ListenerHandlerFinished,
            elapsed: started.elapsed(),
            timestamp,
            name: self.receiver.entity_path(),
            source: Some(self.receiver.endpoint()),
            is_successful: result.is_completed(),
            properties: Some(result.properties()),
        });
        debug!(
            event_id = EventId::ListenerHandlerFinished.code(),
            outcome = %result.outcome(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Message handled"
        );
        Ok(())
    }

    fn dead_letters_failures(&self) -> bool {
        self.config.dead_letter_on_unhandled_error() && !self.config.auto_complete()
    }

    async fn dead_letter_unmapped(&self, message: &ReceivedMessage) -> PipelineResult<()> {
        error!(
            event_id = EventId::ProcessorDispatcherMissingType.code(),
            listener = %self.name,
            message_id = %message.message.message_id,
            "No processor for message; dead-lettering"
        );

        if self.config.auto_complete() || self.receiver.is_closed_or_closing() {
            return Ok(());
        }

        let result = HandlingResult::dead_lettered(
            UNMAPPED_PROCESSOR_REASON,
            Some(message.user_properties().clone()),
        );
        let settled = self
            .receiver
            .dead_letter(message.lock_token(), result.properties())
            .await;
        self.settled(message, settled)
    }

    async fn acknowledge(
        &self,
        message: &ReceivedMessage,
        result: &HandlingResult,
    ) -> PipelineResult<()> {
        let lock_token = message.lock_token();
        let settled = match result.outcome() {
            HandlingOutcome::Completed => self.receiver.complete(lock_token).await,
            HandlingOutcome::DeadLettered | HandlingOutcome::UnrecognisedMessageType => {
                self.receiver
                    .dead_letter(lock_token, result.properties())
                    .await
            }
            HandlingOutcome::Abandoned => {
                self.receiver.abandon(lock_token, result.properties()).await
            }
        };
        self.settled(message, settled)
    }

    fn settled(
        &self,
        message: &ReceivedMessage,
        settled: TransportResult<()>,
    ) -> PipelineResult<()> {
        match settled {
            Ok(()) => Ok(()),
            Err(e) if e.is_lock_lost() => {
                warn!(
                    event_id = EventId::ListenerException.code(),
                    listener = %self.name,
                    message_id = %message.message.message_id,
                    error = %e,
                    "Lock lost before acknowledgement; message will be redelivered"
                );
                Ok(())
            }
            Err(e) => Err(PipelineError::from(e)),
        }
    }
}

impl fmt::Debug for MessageListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageListener")
            .field("name", &self.inner.name)
            .field("entity_path", &self.inner.config.entity_path())
            .field("source", &self.inner.source)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{ProcessorRegistry, PropertyDispatcher};
    use crate::processor::Processor;
    use crate::testing::{
        Farewell, Greeting, Settlement, SpyInstrumentor, SpyReceiver, greeting_message, received,
    };
    use quay_core::{
        DEFAULT_MESSAGE_TYPE_PROPERTY, EndpointConfig, HandlerError, MessageContext,
        MessageType, TransportError, WireMessage, handler_fn, keys,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn config(auto_complete: bool) -> EndpointHandlingConfig {
        EndpointHandlingConfig::builder(EndpointConfig::new("memory://spy", "spy-queue").unwrap())
            .auto_complete(auto_complete)
            .max_concurrent_calls(4)
            .build()
            .unwrap()
    }

    fn replying(
        result: fn() -> Result<HandlingResult, HandlerError>,
        calls: Arc<AtomicUsize>,
    ) -> BoxedProcessor {
        Processor::<Greeting, _>::new(handler_fn(
            move |_: Greeting, _: MessageContext, _: CancellationToken| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { result() }
            },
        ))
        .boxed()
    }

    fn single(
        config: EndpointHandlingConfig,
        receiver: &Arc<SpyReceiver>,
        instrumentor: &Arc<SpyInstrumentor>,
        result: fn() -> Result<HandlingResult, HandlerError>,
    ) -> (MessageListener, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = MessageListener::builder(config, receiver.clone())
            .instrumentor(instrumentor.clone())
            .single_type(replying(result, Arc::clone(&calls)));
        (listener, calls)
    }

    fn tagged(mut message: ReceivedMessage, type_name: &str) -> ReceivedMessage {
        message
            .message
            .user_properties
            .insert(DEFAULT_MESSAGE_TYPE_PROPERTY.into(), type_name.into());
        message
    }

    #[tokio::test]
    async fn test_start_registers_handling_options() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });

        assert_eq!(listener.state(), ListenerState::Idle);
        listener.start_listening(CancellationToken::new()).unwrap();
        assert!(listener.is_listening());

        let options = receiver.options();
        assert!(!options.auto_complete);
        assert_eq!(options.max_concurrent_calls, 4);
        assert_eq!(options.max_auto_renew_duration.as_secs(), 300);
        assert_eq!(listener.name(), format!("spy-queue[{}]", Greeting::TYPE_NAME));
    }

    #[tokio::test]
    async fn test_start_twice_is_a_no_op() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });

        listener.start_listening(CancellationToken::new()).unwrap();
        listener.start_listening(CancellationToken::new()).unwrap();
        assert!(listener.is_listening());
    }

    #[tokio::test]
    async fn test_start_with_cancelled_token_fails() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });
        let token = CancellationToken::new();
        token.cancel();

        let err = assert_err!(listener.start_listening(token));
        assert!(matches!(err, ListenerError::StartCancelled { .. }));
        assert_eq!(listener.state(), ListenerState::Idle);
        assert!(receiver.registration.lock().is_none());
    }

    #[tokio::test]
    async fn test_completed_result_completes_once() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, calls) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });
        listener.start_listening(CancellationToken::new()).unwrap();

        let message = greeting_message(5, "Hello world");
        let token = message.lock_token().clone();
        receiver.deliver(message).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(receiver.settlements(), vec![Settlement::Complete(token)]);

        let requests = instrumentor.requests.lock().clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is_successful);
        assert_eq!(requests[0].name, "spy-queue");
    }

    #[tokio::test]
    async fn test_dead_lettered_result_dead_letters_with_properties() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::dead_lettered("poison", None))
        });
        listener.start_listening(CancellationToken::new()).unwrap();

        receiver.deliver(greeting_message(1, "x")).await.unwrap();

        let settlements = receiver.settlements();
        assert_eq!(settlements.len(), 1);
        match &settlements[0] {
            Settlement::DeadLetter(_, props) => {
                assert_eq!(
                    props.get(keys::DEAD_LETTERED).and_then(|v| v.as_str()),
                    Some("poison")
                );
            }
            other => panic!("unexpected settlement: {other:?}"),
        }

        let requests = instrumentor.requests.lock().clone();
        assert!(!requests[0].is_successful);
        assert!(
            requests[0]
                .properties
                .as_ref()
                .is_some_and(|p| p.contains_key(keys::DEAD_LETTERED))
        );
    }

    #[tokio::test]
    async fn test_unrecognised_body_is_dead_lettered() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, calls) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });
        listener.start_listening(CancellationToken::new()).unwrap();

        receiver
            .deliver(received(WireMessage::new(b"null".to_vec())))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let settlements = receiver.settlements();
        assert_eq!(settlements.len(), 1);
        assert!(matches!(
            &settlements[0],
            Settlement::DeadLetter(_, props) if props.contains_key(keys::UNRECOGNISED_MESSAGE_TYPE)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_handler_is_abandoned() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Err(HandlerError::Cancelled)
        });
        listener.start_listening(CancellationToken::new()).unwrap();

        receiver.deliver(greeting_message(1, "x")).await.unwrap();

        let settlements = receiver.settlements();
        assert_eq!(settlements.len(), 1);
        assert!(matches!(
            &settlements[0],
            Settlement::Abandon(_, props) if props.contains_key(keys::ABANDONED)
        ));
    }

    #[tokio::test]
    async fn test_auto_complete_skips_acknowledgement() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, calls) = single(config(true), &receiver, &instrumentor, || {
            Ok(HandlingResult::dead_lettered("ignored", None))
        });
        listener.start_listening(CancellationToken::new()).unwrap();
        assert!(receiver.options().auto_complete);

        receiver.deliver(greeting_message(1, "x")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(receiver.settlements().is_empty());
        assert_eq!(instrumentor.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_closing_receiver_skips_acknowledgement() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });
        listener.start_listening(CancellationToken::new()).unwrap();
        receiver.closed.store(true, Ordering::SeqCst);

        receiver.deliver(greeting_message(1, "x")).await.unwrap();

        assert!(receiver.settlements().is_empty());
    }

    #[tokio::test]
    async fn test_lock_lost_is_swallowed() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });
        listener.start_listening(CancellationToken::new()).unwrap();
        receiver.lose_locks.store(true, Ordering::SeqCst);

        receiver.deliver(greeting_message(1, "x")).await.unwrap();

        assert!(receiver.settlements().is_empty());
        assert_eq!(instrumentor.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_propagates_without_acknowledgement() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Err(HandlerError::failed("boom"))
        });
        listener.start_listening(CancellationToken::new()).unwrap();

        let err = receiver.deliver(greeting_message(1, "x")).await.unwrap_err();

        assert!(matches!(err, PipelineError::Handler { .. }));
        assert!(receiver.settlements().is_empty());
        assert!(instrumentor.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_on_unhandled_error() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let config = EndpointHandlingConfig::builder(
            EndpointConfig::new("memory://spy", "spy-queue").unwrap(),
        )
        .dead_letter_on_unhandled_error(true)
        .build()
        .unwrap();
        let (listener, _) = single(config, &receiver, &instrumentor, || {
            Err(HandlerError::failed("boom"))
        });
        listener.start_listening(CancellationToken::new()).unwrap();

        receiver.deliver(greeting_message(1, "x")).await.unwrap();

        let settlements = receiver.settlements();
        assert_eq!(settlements.len(), 1);
        match &settlements[0] {
            Settlement::DeadLetter(_, props) => {
                assert!(
                    props
                        .get(keys::ERROR_MESSAGE)
                        .and_then(|v| v.as_str())
                        .is_some_and(|m| m.contains("boom"))
                );
            }
            other => panic!("unexpected settlement: {other:?}"),
        }
        let requests = instrumentor.requests.lock().clone();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].is_successful);
    }

    #[tokio::test]
    async fn test_dead_letter_on_unhandled_error_ignores_serialisation_failures() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let config = EndpointHandlingConfig::builder(
            EndpointConfig::new("memory://spy", "spy-queue").unwrap(),
        )
        .dead_letter_on_unhandled_error(true)
        .build()
        .unwrap();
        let (listener, calls) = single(config, &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });
        listener.start_listening(CancellationToken::new()).unwrap();

        let err = assert_err!(
            receiver
                .deliver(received(WireMessage::new("not json")))
                .await
        );

        assert!(matches!(err, PipelineError::Serialisation(_)));
        assert!(receiver.settlements().is_empty());
        assert!(instrumentor.requests.lock().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_multi_type_routes_by_tag() {
        let receiver = SpyReceiver::new();
        let greetings = Arc::new(AtomicUsize::new(0));
        let farewells = Arc::new(AtomicUsize::new(0));
        let farewell_calls = Arc::clone(&farewells);

        let mut registry = ProcessorRegistry::new().with(Processor::<Farewell, _>::new(handler_fn(
            move |_: Farewell, _: MessageContext, _: CancellationToken| {
                farewell_calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(HandlingResult::completed(None)) }
            },
        )));
        registry.register_boxed(replying(
            || Ok(HandlingResult::completed(None)),
            Arc::clone(&greetings),
        ));

        let listener = MessageListener::multi_type(
            config(false),
            receiver.clone(),
            Arc::new(PropertyDispatcher::new(registry)),
        );
        listener.start_listening(CancellationToken::new()).unwrap();
        assert_eq!(listener.name(), "spy-queue[*]");

        receiver
            .deliver(tagged(greeting_message(1, "x"), Greeting::TYPE_NAME))
            .await
            .unwrap();

        assert_eq!(greetings.load(Ordering::SeqCst), 1);
        assert_eq!(farewells.load(Ordering::SeqCst), 0);
        assert!(matches!(
            receiver.settlements().as_slice(),
            [Settlement::Complete(_)]
        ));
    }

    #[tokio::test]
    async fn test_multi_type_without_tag_dead_letters_without_processing() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ProcessorRegistry::new();
        registry.register_boxed(replying(
            || Ok(HandlingResult::completed(None)),
            Arc::clone(&calls),
        ));

        let listener = MessageListener::builder(config(false), receiver.clone())
            .instrumentor(instrumentor.clone())
            .multi_type(Arc::new(PropertyDispatcher::new(registry)));
        listener.start_listening(CancellationToken::new()).unwrap();

        receiver.deliver(greeting_message(1, "x")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let settlements = receiver.settlements();
        assert_eq!(settlements.len(), 1);
        match &settlements[0] {
            Settlement::DeadLetter(_, props) => assert_eq!(
                props.get(keys::DEAD_LETTERED).and_then(|v| v.as_str()),
                Some(UNMAPPED_PROCESSOR_REASON)
            ),
            other => panic!("unexpected settlement: {other:?}"),
        }
        assert!(instrumentor.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_closes_once_and_is_idempotent() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });

        listener.stop_listening().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Idle);
        assert_eq!(*receiver.close_calls.lock(), 0);

        listener.start_listening(CancellationToken::new()).unwrap();
        listener.stop_listening().await.unwrap();
        listener.stop_listening().await.unwrap();

        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(*receiver.close_calls.lock(), 1);

        let err = listener
            .start_listening(CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ListenerError::AlreadyStopped { .. }));
    }

    #[tokio::test]
    async fn test_stop_skips_close_when_receiver_already_closing() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (listener, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });
        listener.start_listening(CancellationToken::new()).unwrap();
        receiver.closed.store(true, Ordering::SeqCst);

        listener.stop_listening().await.unwrap();

        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(*receiver.close_calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_registration_failure_leaves_listener_idle() {
        let receiver = SpyReceiver::new();
        let instrumentor = SpyInstrumentor::new();
        let (first, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });
        let (second, _) = single(config(false), &receiver, &instrumentor, || {
            Ok(HandlingResult::completed(None))
        });

        assert_ok!(first.start_listening(CancellationToken::new()));
        let err = assert_err!(second.start_listening(CancellationToken::new()));

        assert!(matches!(
            err,
            ListenerError::Transport(TransportError::HandlerAlreadyRegistered { .. })
        ));
        assert_eq!(second.state(), ListenerState::Idle);
    }

    #[test]
    fn test_error_callback_never_panics() {
        let callback = Inner::error_callback("spy");
        callback(ExceptionReceived {
            error: PipelineError::Transport(TransportError::Cancelled),
            action: quay_core::ExceptionAction::Receive,
            endpoint: "memory://spy".into(),
            entity_path: "spy-queue".into(),
        });
        callback(ExceptionReceived {
            error: PipelineError::Transport(TransportError::Other("link detached".into())),
            action: quay_core::ExceptionAction::UserCallback,
            endpoint: "memory://spy".into(),
            entity_path: "spy-queue".into(),
        });
    }
}
