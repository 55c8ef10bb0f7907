//! Receiver and message pump for in-memory entities.
//!
//! Registering a callback spawns one pump task per receiver. The pump locks
//! messages as permits become free and runs each callback on its own task:
//!
//! ```text
//! pump ──acquire permit──▶ lock next ──spawn──▶ callback ──▶ auto-complete
//!   ▲                                               │             or
//!   └──────────── permit released ◀─────────────────┘     abandon + on_error
//! ```
//!
//! While a callback runs its lock is renewed every half lock duration, up to
//! the registered `max_auto_renew_duration`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use quay_core::{
    ExceptionAction, ExceptionReceived, LockToken, MessageCallback, MessageHandlerOptions,
    MessageReceiver, PipelineError, PipelineResult, ReceivedMessage, TransportError,
    TransportResult, UserProperties,
};

use crate::entity::Entity;

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

/// Receiving client for one in-memory entity.
pub struct InMemoryReceiver {
    endpoint: String,
    entity: Arc<Entity>,
    closing: CancellationToken,
    registered: AtomicBool,
    poll_interval: Duration,
}

impl InMemoryReceiver {
    pub(crate) fn new(endpoint: String, entity: Arc<Entity>, poll_interval: Duration) -> Self {
        Self {
            endpoint,
            entity,
            closing: CancellationToken::new(),
            registered: AtomicBool::new(false),
            poll_interval,
        }
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closing.is_cancelled() {
            return Err(TransportError::Closed {
                entity_path: self.entity.path().to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for InMemoryReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryReceiver")
            .field("endpoint", &self.endpoint)
            .field("entity_path", &self.entity.path())
            .field("closing", &self.closing.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn entity_path(&self) -> &str {
        self.entity.path()
    }

    fn is_closed_or_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    fn register_message_handler(
        &self,
        callback: MessageCallback,
        options: MessageHandlerOptions,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        let runtime = Handle::try_current().map_err(|e| {
            TransportError::Other(format!("no async runtime to drive the message pump: {e}"))
        })?;
        if self.registered.swap(true, Ordering::SeqCst) {
            return Err(TransportError::HandlerAlreadyRegistered {
                entity_path: self.entity.path().to_owned(),
            });
        }

        debug!(
            endpoint = %self.endpoint,
            entity = %self.entity.path(),
            auto_complete = options.auto_complete,
            max_concurrent_calls = options.max_concurrent_calls,
            "Registered message handler"
        );

        let pump = MessagePump {
            shared: Arc::new(PumpShared {
                endpoint: self.endpoint.clone(),
                entity: Arc::clone(&self.entity),
                callback,
                options,
            }),
            closing: self.closing.clone(),
            poll_interval: self.poll_interval,
        };
        runtime.spawn(pump.run());
        Ok(())
    }

    async fn complete(&self, lock_token: &LockToken) -> TransportResult<()> {
        self.ensure_open()?;
        self.entity.complete(lock_token)
    }

    async fn abandon(
        &self,
        lock_token: &LockToken,
        properties: &UserProperties,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        self.entity.abandon(lock_token, properties)
    }

    async fn dead_letter(
        &self,
        lock_token: &LockToken,
        properties: &UserProperties,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        self.entity.dead_letter(lock_token, properties)
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.closing.is_cancelled() {
            self.closing.cancel();
            debug!(endpoint = %self.endpoint, entity = %self.entity.path(), "Closed receiver");
        }
        Ok(())
    }
}

// ─── Message Pump ───────────────────────────────────────────────────────────

struct PumpShared {
    endpoint: String,
    entity: Arc<Entity>,
    callback: MessageCallback,
    options: MessageHandlerOptions,
}

struct MessagePump {
    shared: Arc<PumpShared>,
    closing: CancellationToken,
    poll_interval: Duration,
}

impl MessagePump {
    async fn run(self) {
        let permits = Arc::new(Semaphore::new(
            self.shared.options.max_concurrent_calls.max(1) as usize,
        ));
        trace!(entity = %self.shared.entity.path(), "Message pump started");

        loop {
            let permit = tokio::select! {
                _ = self.closing.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let Some(message) = self.next_message().await else {
                break;
            };
            tokio::spawn(Arc::clone(&self.shared).deliver(message, permit));
        }

        trace!(entity = %self.shared.entity.path(), "Message pump stopped");
    }

    async fn next_message(&self) -> Option<ReceivedMessage> {
        loop {
            if self.closing.is_cancelled() {
                return None;
            }
            if let Some(message) = self.shared.entity.try_lock_next() {
                return Some(message);
            }
            tokio::select! {
                _ = self.closing.cancelled() => return None,
                _ = self.shared.entity.wait_available(self.poll_interval) => {}
            }
        }
    }
}

impl PumpShared {
    async fn deliver(self: Arc<Self>, message: ReceivedMessage, _permit: OwnedSemaphorePermit) {
        let lock_token = message.lock_token().clone();

        match self.invoke_with_renewal(message, &lock_token).await {
            Ok(()) if self.options.auto_complete => {
                if let Err(error) = self.entity.complete(&lock_token) {
                    self.report(error.into(), ExceptionAction::Complete);
                }
            }
            Ok(()) => {}
            Err(error) => {
                match self.entity.abandon(&lock_token, &UserProperties::new()) {
                    Err(abandon_error) if !abandon_error.is_lock_lost() => {
                        self.report(abandon_error.into(), ExceptionAction::Abandon);
                    }
                    _ => {}
                }
                self.report(error, ExceptionAction::UserCallback);
            }
        }
    }

    async fn invoke_with_renewal(
        &self,
        message: ReceivedMessage,
        lock_token: &LockToken,
    ) -> PipelineResult<()> {
        let renew_until = Instant::now() + self.options.max_auto_renew_duration;
        let interval = (self.entity.lock_duration() / 2).max(MIN_RENEW_INTERVAL);
        let mut renewing = true;
        let mut callback = (self.callback)(message);

        loop {
            tokio::select! {
                outcome = &mut callback => return outcome,
                _ = tokio::time::sleep(interval), if renewing => {
                    if Instant::now() >= renew_until {
                        renewing = false;
                        continue;
                    }
                    if let Err(error) = self.entity.renew_lock(lock_token) {
                        renewing = false;
                        self.report(error.into(), ExceptionAction::RenewLock);
                    }
                }
            }
        }
    }

    fn report(&self, error: PipelineError, action: ExceptionAction) {
        (self.options.on_error)(ExceptionReceived {
            error,
            action,
            endpoint: self.endpoint.clone(),
            entity_path: self.entity.path().to_owned(),
        });
    }
}
