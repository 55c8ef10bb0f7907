//! Recording doubles shared by the unit tests of this crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use quay_core::{
    DependencyTelemetry, ElapsedTelemetry, EventId, Instrumentor, LockToken, MessageCallback,
    MessageHandlerOptions, MessageReceiver, MessageSender, MessageType, PipelineResult,
    ReceivedMessage, RequestTelemetry, SystemProperties, TransportError, TransportResult,
    UserProperties, WireMessage,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Greeting {
    #[serde(rename = "Id")]
    pub id: i32,
    #[serde(rename = "Name")]
    pub name: String,
}

impl MessageType for Greeting {
    const TYPE_NAME: &'static str = "quay_framework::testing::Greeting";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Farewell {
    pub reason: String,
}

impl MessageType for Farewell {
    const TYPE_NAME: &'static str = "quay_framework::testing::Farewell";
}

pub fn received(message: WireMessage) -> ReceivedMessage {
    ReceivedMessage {
        message,
        system: SystemProperties {
            lock_token: LockToken::new(next_lock_token()),
            delivery_count: 1,
            sequence_number: 1,
            enqueued_time: Utc::now(),
        },
    }
}

fn next_lock_token() -> String {
    use std::sync::atomic::AtomicU64;
    static NEXT: AtomicU64 = AtomicU64::new(1);
    format!("lock-{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

pub fn greeting_message(id: i32, name: &str) -> ReceivedMessage {
    let body = serde_json::to_vec(&Greeting {
        id,
        name: name.into(),
    })
    .unwrap();
    received(WireMessage::new(body))
}

// ============================================================================
// Receiver
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Complete(LockToken),
    Abandon(LockToken, UserProperties),
    DeadLetter(LockToken, UserProperties),
}

#[derive(Default)]
pub struct SpyReceiver {
    pub settlements: Mutex<Vec<Settlement>>,
    pub registration: Mutex<Option<(MessageCallback, MessageHandlerOptions)>>,
    pub close_calls: Mutex<u32>,
    pub closed: AtomicBool,
    pub lose_locks: AtomicBool,
}

impl SpyReceiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs the registered callback as the transport would.
    pub async fn deliver(&self, message: ReceivedMessage) -> PipelineResult<()> {
        let callback = self
            .registration
            .lock()
            .as_ref()
            .map(|(callback, _)| Arc::clone(callback))
            .expect("no callback registered");
        callback(message).await
    }

    pub fn options(&self) -> MessageHandlerOptions {
        self.registration
            .lock()
            .as_ref()
            .map(|(_, options)| options.clone())
            .expect("no callback registered")
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().clone()
    }

    fn settle(&self, settlement: Settlement) -> TransportResult<()> {
        if self.lose_locks.load(Ordering::SeqCst) {
            let token = match &settlement {
                Settlement::Complete(t) | Settlement::Abandon(t, _) | Settlement::DeadLetter(t, _) => {
                    t.to_string()
                }
            };
            return Err(TransportError::LockLost { lock_token: token });
        }
        self.settlements.lock().push(settlement);
        Ok(())
    }
}

#[async_trait]
impl MessageReceiver for SpyReceiver {
    fn endpoint(&self) -> &str {
        "memory://spy"
    }

    fn entity_path(&self) -> &str {
        "spy-queue"
    }

    fn is_closed_or_closing(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn register_message_handler(
        &self,
        callback: MessageCallback,
        options: MessageHandlerOptions,
    ) -> TransportResult<()> {
        let mut registration = self.registration.lock();
        if registration.is_some() {
            return Err(TransportError::HandlerAlreadyRegistered {
                entity_path: self.entity_path().to_string(),
            });
        }
        *registration = Some((callback, options));
        Ok(())
    }

    async fn complete(&self, lock_token: &LockToken) -> TransportResult<()> {
        self.settle(Settlement::Complete(lock_token.clone()))
    }

    async fn abandon(
        &self,
        lock_token: &LockToken,
        properties: &UserProperties,
    ) -> TransportResult<()> {
        self.settle(Settlement::Abandon(lock_token.clone(), properties.clone()))
    }

    async fn dead_letter(
        &self,
        lock_token: &LockToken,
        properties: &UserProperties,
    ) -> TransportResult<()> {
        self.settle(Settlement::DeadLetter(lock_token.clone(), properties.clone()))
    }

    async fn close(&self) -> TransportResult<()> {
        *self.close_calls.lock() += 1;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Sender
// ============================================================================

#[derive(Default)]
pub struct SpySender {
    pub single: Mutex<Vec<WireMessage>>,
    pub batches: Mutex<Vec<Vec<WireMessage>>>,
    pub fail: AtomicBool,
}

impl SpySender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl MessageSender for SpySender {
    fn path(&self) -> &str {
        "spy-topic"
    }

    async fn send(&self, message: WireMessage) -> TransportResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("link detached".into()));
        }
        self.single.lock().push(message);
        Ok(())
    }

    async fn send_batch(&self, messages: Vec<WireMessage>) -> TransportResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("link detached".into()));
        }
        self.batches.lock().push(messages);
        Ok(())
    }
}

// ============================================================================
// Instrumentor
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub name: String,
    pub is_successful: bool,
    pub properties: Option<UserProperties>,
}

#[derive(Debug, Clone)]
pub struct RecordedDependency {
    pub event_id: EventId,
    pub dependency_type: String,
    pub target: String,
    pub name: String,
    pub properties: Option<UserProperties>,
}

#[derive(Default)]
pub struct SpyInstrumentor {
    pub elapsed: Mutex<Vec<(EventId, String)>>,
    pub requests: Mutex<Vec<RecordedRequest>>,
    pub dependencies: Mutex<Vec<RecordedDependency>>,
}

impl SpyInstrumentor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Instrumentor for SpyInstrumentor {
    fn track_elapsed(&self, telemetry: ElapsedTelemetry<'_>) {
        self.elapsed
            .lock()
            .push((telemetry.event_id, telemetry.name.to_string()));
    }

    fn track_request(&self, telemetry: RequestTelemetry<'_>) {
        self.requests.lock().push(RecordedRequest {
            name: telemetry.name.to_string(),
            is_successful: telemetry.is_successful,
            properties: telemetry.properties.cloned(),
        });
    }

    fn track_dependency(&self, telemetry: DependencyTelemetry<'_>) {
        self.dependencies.lock().push(RecordedDependency {
            event_id: telemetry.event_id,
            dependency_type: telemetry.dependency_type.to_string(),
            target: telemetry.target.to_string(),
            name: telemetry.name.to_string(),
            properties: telemetry.properties.cloned(),
        });
    }
}
