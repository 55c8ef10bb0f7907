//! Queue state shared by every client of one entity path.
//!
//! Messages move between two tables under a single lock:
//!
//! ```text
//!            enqueue              lock (delivery_count += 1)
//! sender ───────────▶ ready ─────────────────────────────▶ locked
//!                       ▲                                    │
//!                       └──── abandon / lock expiry ─────────┤
//!                                                            ├── complete ──▶ (gone)
//!                       dead-letter entity ◀── dead-letter ──┘
//! ```
//!
//! A message whose delivery count reaches the limit is moved to the
//! dead-letter entity instead of going back to `ready`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use quay_core::{
    LockToken, ReceivedMessage, SystemProperties, TransportError, TransportResult,
    UserProperties, WireMessage,
};

/// User property stamped on messages the broker dead-letters by itself.
pub const DEAD_LETTER_REASON_PROPERTY: &str = "DeadLetterReason";

/// Reason recorded when a message runs out of deliveries.
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

/// Per-entity broker behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySettings {
    /// How long a delivered message stays locked without renewal.
    pub lock_duration: Duration,
    /// Deliveries allowed before a message is dead-lettered.
    pub max_delivery_count: u32,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(60),
            max_delivery_count: 10,
        }
    }
}

// ─── Stored Messages ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Stored {
    message: WireMessage,
    sequence_number: i64,
    enqueued_time: DateTime<Utc>,
    delivery_count: u32,
}

impl Stored {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.message
            .scheduled_enqueue_time
            .is_none_or(|at| at <= now)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.message.time_to_live else {
            return false;
        };
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.enqueued_time.checked_add_signed(ttl))
            .is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug)]
struct Locked {
    stored: Stored,
    locked_until: Instant,
}

#[derive(Debug, Default)]
struct EntityState {
    ready: BTreeMap<i64, Stored>,
    locked: HashMap<LockToken, Locked>,
    last_sequence: i64,
}

impl EntityState {
    fn next_sequence(&mut self) -> i64 {
        self.last_sequence += 1;
        self.last_sequence
    }
}

fn lock_lost(lock_token: &LockToken) -> TransportError {
    TransportError::LockLost {
        lock_token: lock_token.to_string(),
    }
}

// ─── Entity ─────────────────────────────────────────────────────────────────

/// A queue (or dead-letter sub-queue) held by the in-memory broker.
pub(crate) struct Entity {
    path: String,
    settings: EntitySettings,
    state: Mutex<EntityState>,
    available: Notify,
    dead_letter: Option<Arc<Entity>>,
}

impl Entity {
    pub(crate) fn new(
        path: impl Into<String>,
        settings: EntitySettings,
        dead_letter: Option<Arc<Entity>>,
    ) -> Self {
        Self {
            path: path.into(),
            settings,
            state: Mutex::new(EntityState::default()),
            available: Notify::new(),
            dead_letter,
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn lock_duration(&self) -> Duration {
        self.settings.lock_duration
    }

    /// Appends messages in order and wakes waiting receivers.
    pub(crate) fn enqueue(&self, messages: Vec<WireMessage>) {
        let count = messages.len();
        let now = Utc::now();
        {
            let mut state = self.state.lock();
            for message in messages {
                let sequence_number = state.next_sequence();
                state.ready.insert(
                    sequence_number,
                    Stored {
                        message,
                        sequence_number,
                        enqueued_time: now,
                        delivery_count: 0,
                    },
                );
            }
        }
        for _ in 0..count {
            self.available.notify_one();
        }
        trace!(entity = %self.path, count, "Enqueued messages");
    }

    fn accept(&self, mut stored: Stored) {
        {
            let mut state = self.state.lock();
            stored.sequence_number = state.next_sequence();
            state.ready.insert(stored.sequence_number, stored);
        }
        self.available.notify_one();
    }

    /// Waits until a message may be available or `poll` elapses.
    pub(crate) async fn wait_available(&self, poll: Duration) {
        tokio::select! {
            _ = self.available.notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }

    /// Locks the oldest visible message, if any.
    pub(crate) fn try_lock_next(&self) -> Option<ReceivedMessage> {
        let now = Utc::now();
        let instant = Instant::now();
        let mut exhausted = Vec::new();
        let received = {
            let mut state = self.state.lock();
            self.reclaim_expired_locks(&mut state, instant, &mut exhausted);
            self.lock_visible(&mut state, now, instant)
        };
        self.forward_to_dead_letter(exhausted);
        received
    }

    fn lock_visible(
        &self,
        state: &mut EntityState,
        now: DateTime<Utc>,
        instant: Instant,
    ) -> Option<ReceivedMessage> {
        loop {
            let sequence_number = state
                .ready
                .values()
                .find(|stored| stored.is_visible(now))
                .map(|stored| stored.sequence_number)?;
            let mut stored = state.ready.remove(&sequence_number)?;

            if stored.is_expired(now) {
                debug!(
                    entity = %self.path,
                    message_id = %stored.message.message_id,
                    "Discarded expired message"
                );
                continue;
            }

            stored.delivery_count += 1;
            let lock_token = LockToken::new(Uuid::new_v4().to_string());
            let received = ReceivedMessage {
                message: stored.message.clone(),
                system: SystemProperties {
                    lock_token: lock_token.clone(),
                    delivery_count: stored.delivery_count,
                    sequence_number,
                    enqueued_time: stored.enqueued_time,
                },
            };
            state.locked.insert(
                lock_token,
                Locked {
                    stored,
                    locked_until: instant + self.settings.lock_duration,
                },
            );
            return Some(received);
        }
    }

    fn reclaim_expired_locks(
        &self,
        state: &mut EntityState,
        instant: Instant,
        exhausted: &mut Vec<Stored>,
    ) {
        let expired: Vec<LockToken> = state
            .locked
            .iter()
            .filter(|(_, locked)| locked.locked_until <= instant)
            .map(|(token, _)| token.clone())
            .collect();

        for token in expired {
            if let Some(locked) = state.locked.remove(&token) {
                debug!(
                    entity = %self.path,
                    message_id = %locked.stored.message.message_id,
                    lock_token = %token,
                    "Message lock expired"
                );
                self.release(state, locked.stored, exhausted);
            }
        }
    }

    fn release(&self, state: &mut EntityState, stored: Stored, exhausted: &mut Vec<Stored>) {
        if self.dead_letter.is_some() && stored.delivery_count >= self.settings.max_delivery_count
        {
            exhausted.push(stored);
        } else {
            state.ready.insert(stored.sequence_number, stored);
        }
    }

    fn forward_to_dead_letter(&self, exhausted: Vec<Stored>) {
        let Some(dead_letter) = &self.dead_letter else {
            return;
        };
        for mut stored in exhausted {
            warn!(
                entity = %self.path,
                message_id = %stored.message.message_id,
                delivery_count = stored.delivery_count,
                "Message exceeded max delivery count, moving to dead-letter queue"
            );
            stored.message.user_properties.insert(
                DEAD_LETTER_REASON_PROPERTY.into(),
                MAX_DELIVERY_COUNT_EXCEEDED.into(),
            );
            dead_letter.accept(stored);
        }
    }

    fn take_locked(&self, state: &mut EntityState, lock_token: &LockToken) -> TransportResult<Stored> {
        let live = state
            .locked
            .get(lock_token)
            .is_some_and(|locked| locked.locked_until > Instant::now());
        if !live {
            return Err(lock_lost(lock_token));
        }
        state
            .locked
            .remove(lock_token)
            .map(|locked| locked.stored)
            .ok_or_else(|| lock_lost(lock_token))
    }

    // ─── Settlement ─────────────────────────────────────────────────────────

    pub(crate) fn complete(&self, lock_token: &LockToken) -> TransportResult<()> {
        let stored = self.take_locked(&mut self.state.lock(), lock_token)?;
        trace!(entity = %self.path, message_id = %stored.message.message_id, "Completed message");
        Ok(())
    }

    pub(crate) fn abandon(
        &self,
        lock_token: &LockToken,
        properties: &UserProperties,
    ) -> TransportResult<()> {
        let mut exhausted = Vec::new();
        {
            let mut state = self.state.lock();
            let mut stored = self.take_locked(&mut state, lock_token)?;
            merge_properties(&mut stored.message, properties);
            trace!(entity = %self.path, message_id = %stored.message.message_id, "Abandoned message");
            self.release(&mut state, stored, &mut exhausted);
        }
        self.forward_to_dead_letter(exhausted);
        self.available.notify_one();
        Ok(())
    }

    pub(crate) fn dead_letter(
        &self,
        lock_token: &LockToken,
        properties: &UserProperties,
    ) -> TransportResult<()> {
        let Some(dead_letter) = &self.dead_letter else {
            return Err(TransportError::Other(format!(
                "'{}' is a dead-letter queue and cannot dead-letter messages",
                self.path
            )));
        };
        let mut stored = self.take_locked(&mut self.state.lock(), lock_token)?;
        merge_properties(&mut stored.message, properties);
        debug!(entity = %self.path, message_id = %stored.message.message_id, "Dead-lettered message");
        dead_letter.accept(stored);
        Ok(())
    }

    /// Extends a live lock by one lock duration.
    pub(crate) fn renew_lock(&self, lock_token: &LockToken) -> TransportResult<()> {
        let instant = Instant::now();
        let mut state = self.state.lock();
        match state.locked.get_mut(lock_token) {
            Some(locked) if locked.locked_until > instant => {
                locked.locked_until = instant + self.settings.lock_duration;
                Ok(())
            }
            _ => Err(lock_lost(lock_token)),
        }
    }

    // ─── Inspection ─────────────────────────────────────────────────────────

    pub(crate) fn ready_count(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub(crate) fn locked_count(&self) -> usize {
        self.state.lock().locked.len()
    }

    pub(crate) fn peek(&self) -> Vec<WireMessage> {
        self.state
            .lock()
            .ready
            .values()
            .map(|stored| stored.message.clone())
            .collect()
    }
}

fn merge_properties(message: &mut WireMessage, properties: &UserProperties) {
    message.user_properties.extend(
        properties
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(settings: EntitySettings) -> Entity {
        let dead_letter = Arc::new(Entity::new("orders/$DeadLetterQueue", settings, None));
        Entity::new("orders", settings, Some(dead_letter))
    }

    fn short_locks() -> EntitySettings {
        EntitySettings {
            lock_duration: Duration::from_secs(1),
            max_delivery_count: 3,
        }
    }

    #[test]
    fn test_delivers_in_sequence_order() {
        let entity = queue(EntitySettings::default());
        entity.enqueue(vec![WireMessage::new("a"), WireMessage::new("b")]);

        let first = entity.try_lock_next().unwrap();
        let second = entity.try_lock_next().unwrap();
        assert_eq!(first.message.body, b"a");
        assert_eq!(first.system.sequence_number, 1);
        assert_eq!(first.system.delivery_count, 1);
        assert_eq!(second.system.sequence_number, 2);
        assert!(entity.try_lock_next().is_none());
        assert_eq!(entity.locked_count(), 2);
    }

    #[test]
    fn test_complete_removes_and_second_settle_loses_lock() {
        let entity = queue(EntitySettings::default());
        entity.enqueue(vec![WireMessage::new("a")]);
        let received = entity.try_lock_next().unwrap();

        entity.complete(received.lock_token()).unwrap();
        assert_eq!(entity.ready_count(), 0);
        assert_eq!(entity.locked_count(), 0);
        assert!(
            entity
                .complete(received.lock_token())
                .unwrap_err()
                .is_lock_lost()
        );
    }

    #[test]
    fn test_abandon_redelivers_with_merged_properties() {
        let entity = queue(EntitySettings::default());
        entity.enqueue(vec![WireMessage::new("a")]);
        let received = entity.try_lock_next().unwrap();

        let mut properties = UserProperties::new();
        properties.insert("Attempt".into(), 1i64.into());
        entity.abandon(received.lock_token(), &properties).unwrap();

        let again = entity.try_lock_next().unwrap();
        assert_eq!(again.system.delivery_count, 2);
        assert_eq!(again.system.sequence_number, 1);
        assert_eq!(again.user_properties().get("Attempt"), Some(&1i64.into()));
        assert_ne!(again.lock_token(), received.lock_token());
    }

    #[test]
    fn test_dead_letter_moves_to_sub_queue() {
        let entity = queue(EntitySettings::default());
        entity.enqueue(vec![WireMessage::new("a")]);
        let received = entity.try_lock_next().unwrap();

        let mut properties = UserProperties::new();
        properties.insert("Reason".into(), "bad".into());
        entity.dead_letter(received.lock_token(), &properties).unwrap();

        assert_eq!(entity.ready_count(), 0);
        let dead = entity.dead_letter.as_ref().unwrap().peek();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].user_properties.get("Reason"), Some(&"bad".into()));
    }

    #[test]
    fn test_dead_letter_queue_cannot_dead_letter() {
        let entity = Entity::new("orders/$DeadLetterQueue", EntitySettings::default(), None);
        entity.enqueue(vec![WireMessage::new("a")]);
        let received = entity.try_lock_next().unwrap();

        let err = entity
            .dead_letter(received.lock_token(), &UserProperties::new())
            .unwrap_err();
        assert!(matches!(err, TransportError::Other(_)));
    }

    #[test]
    fn test_exhausted_deliveries_are_dead_lettered() {
        let entity = queue(short_locks());
        entity.enqueue(vec![WireMessage::new("a")]);

        for _ in 0..3 {
            let received = entity.try_lock_next().unwrap();
            entity
                .abandon(received.lock_token(), &UserProperties::new())
                .unwrap();
        }

        assert!(entity.try_lock_next().is_none());
        let dead = entity.dead_letter.as_ref().unwrap().peek();
        assert_eq!(dead.len(), 1);
        assert_eq!(
            dead[0].user_properties.get(DEAD_LETTER_REASON_PROPERTY),
            Some(&MAX_DELIVERY_COUNT_EXCEEDED.into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_lost_and_redelivered() {
        let entity = queue(short_locks());
        entity.enqueue(vec![WireMessage::new("a")]);
        let received = entity.try_lock_next().unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(entity.renew_lock(received.lock_token()).is_err());
        assert!(
            entity
                .complete(received.lock_token())
                .unwrap_err()
                .is_lock_lost()
        );
        let again = entity.try_lock_next().unwrap();
        assert_eq!(again.system.delivery_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_keeps_lock_alive() {
        let entity = queue(short_locks());
        entity.enqueue(vec![WireMessage::new("a")]);
        let received = entity.try_lock_next().unwrap();

        tokio::time::advance(Duration::from_millis(700)).await;
        entity.renew_lock(received.lock_token()).unwrap();
        tokio::time::advance(Duration::from_millis(700)).await;

        entity.complete(received.lock_token()).unwrap();
    }

    #[test]
    fn test_scheduled_message_stays_hidden() {
        let entity = queue(EntitySettings::default());
        let mut later = WireMessage::new("later");
        later.scheduled_enqueue_time = Some(Utc::now() + chrono::Duration::hours(1));
        entity.enqueue(vec![later, WireMessage::new("now")]);

        let received = entity.try_lock_next().unwrap();
        assert_eq!(received.message.body, b"now");
        assert!(entity.try_lock_next().is_none());
        assert_eq!(entity.ready_count(), 1);
    }

    #[test]
    fn test_expired_message_is_discarded() {
        let entity = queue(EntitySettings::default());
        let mut stale = WireMessage::new("stale");
        stale.time_to_live = Some(Duration::ZERO);
        entity.enqueue(vec![stale]);

        assert!(entity.try_lock_next().is_none());
        assert_eq!(entity.ready_count(), 0);
    }
}
