//! User-scheduled timed messages
//!
//! A [`PlayerMessage`] carries an opaque payload to a [`MessageTarget`] at
//! a precise `(window, position)` coordinate, or immediately when no
//! position is set. Delivery happens at most once per schedule; the
//! sender can cancel, and can block until the message is acknowledged.

use crate::error::EngineError;
use crate::handler::TaskExecutor;
use ramp_common::time::TIME_UNSET;
use std::any::Any;
use std::sync::{Arc, Condvar, Mutex};
use uuid::Uuid;

/// Receives delivered player messages.
pub trait MessageTarget: Send + Sync {
    /// Handles one message. An error returned from a target running on the
    /// playback worker stops playback; an error on an external thread is
    /// surfaced as a remote error.
    fn handle_message(
        &self,
        message_type: i32,
        payload: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
struct DeliveryState {
    canceled: bool,
    processed: bool,
    delivered: bool,
}

struct MessageInner {
    id: Uuid,
    target: Arc<dyn MessageTarget>,
    message_type: i32,
    payload: Option<Arc<dyn Any + Send + Sync>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    window_index: Option<usize>,
    position_ms: i64,
    delete_after_delivery: bool,
    state: Mutex<DeliveryState>,
    processed_signal: Condvar,
}

/// A timed message. Cheap to clone; all clones share delivery state.
#[derive(Clone)]
pub struct PlayerMessage {
    inner: Arc<MessageInner>,
}

impl PlayerMessage {
    pub fn builder(target: Arc<dyn MessageTarget>, message_type: i32) -> PlayerMessageBuilder {
        PlayerMessageBuilder {
            target,
            message_type,
            payload: None,
            executor: None,
            window_index: None,
            position_ms: TIME_UNSET,
            delete_after_delivery: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn message_type(&self) -> i32 {
        self.inner.message_type
    }

    pub fn payload(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.inner.payload.as_deref()
    }

    pub fn target(&self) -> &Arc<dyn MessageTarget> {
        &self.inner.target
    }

    /// Executor the message must be delivered on, or `None` for the
    /// playback worker itself.
    pub fn executor(&self) -> Option<&Arc<dyn TaskExecutor>> {
        self.inner.executor.as_ref()
    }

    /// Target window, when position-scheduled.
    pub fn window_index(&self) -> Option<usize> {
        self.inner.window_index
    }

    /// Target window position in milliseconds, or `TIME_UNSET` for
    /// immediate delivery.
    pub fn position_ms(&self) -> i64 {
        self.inner.position_ms
    }

    pub fn delete_after_delivery(&self) -> bool {
        self.inner.delete_after_delivery
    }

    /// Requests that the message not be delivered. Best-effort: a message
    /// already being delivered cannot be recalled.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.canceled = true;
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.state.lock().unwrap().canceled
    }

    /// Records the delivery outcome and wakes any blocked waiter. Called
    /// exactly once per schedule by the engine.
    pub fn mark_as_processed(&self, delivered: bool) {
        let mut state = self.inner.state.lock().unwrap();
        state.processed = true;
        state.delivered = delivered;
        self.inner.processed_signal.notify_all();
    }

    pub fn is_processed(&self) -> bool {
        self.inner.state.lock().unwrap().processed
    }

    /// Blocks until the message is acknowledged; returns whether it was
    /// actually delivered to its target.
    pub fn blocking_await_delivery(&self) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        while !state.processed {
            state = self.inner.processed_signal.wait(state).unwrap();
        }
        state.delivered
    }
}

impl std::fmt::Debug for PlayerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerMessage")
            .field("id", &self.inner.id)
            .field("message_type", &self.inner.message_type)
            .field("window_index", &self.inner.window_index)
            .field("position_ms", &self.inner.position_ms)
            .finish()
    }
}

/// Builder for [`PlayerMessage`].
pub struct PlayerMessageBuilder {
    target: Arc<dyn MessageTarget>,
    message_type: i32,
    payload: Option<Arc<dyn Any + Send + Sync>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    window_index: Option<usize>,
    position_ms: i64,
    delete_after_delivery: bool,
}

impl PlayerMessageBuilder {
    pub fn payload(mut self, payload: Arc<dyn Any + Send + Sync>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Schedules delivery at a stream position, resolved against the
    /// engine's current timeline.
    pub fn at_position(mut self, window_index: usize, position_ms: i64) -> Self {
        assert!(position_ms != TIME_UNSET);
        self.window_index = Some(window_index);
        self.position_ms = position_ms;
        self
    }

    /// Delivers on the given executor instead of the playback worker.
    pub fn on_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Keeps the message scheduled after delivery (it fires again on every
    /// matching position crossing, e.g. after seeks or repeats).
    pub fn keep_after_delivery(mut self) -> Self {
        self.delete_after_delivery = false;
        self
    }

    pub fn build(self) -> PlayerMessage {
        PlayerMessage {
            inner: Arc::new(MessageInner {
                id: Uuid::new_v4(),
                target: self.target,
                message_type: self.message_type,
                payload: self.payload,
                executor: self.executor,
                window_index: self.window_index,
                position_ms: self.position_ms,
                delete_after_delivery: self.delete_after_delivery,
                state: Mutex::new(DeliveryState::default()),
                processed_signal: Condvar::new(),
            }),
        }
    }
}

/// A pending timed message with its tri-state position resolution.
///
/// Unresolved messages sort after resolved ones; resolved messages sort by
/// `(period_index, period_time_us)`. Sorting is stable, so insertion order
/// breaks ties.
#[derive(Debug, Clone)]
pub struct PendingMessageInfo {
    pub message: PlayerMessage,
    pub resolved_period_index: usize,
    pub resolved_period_time_us: i64,
    pub resolved_period_uid: Option<Uuid>,
}

impl PendingMessageInfo {
    pub fn new(message: PlayerMessage) -> Self {
        Self {
            message,
            resolved_period_index: 0,
            resolved_period_time_us: 0,
            resolved_period_uid: None,
        }
    }

    pub fn set_resolved_position(&mut self, period_index: usize, period_time_us: i64, uid: Uuid) {
        self.resolved_period_index = period_index;
        self.resolved_period_time_us = period_time_us;
        self.resolved_period_uid = Some(uid);
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_period_uid.is_some()
    }

    /// Playback-order comparison used to keep the pending list sorted.
    pub fn playback_order(&self, other: &PendingMessageInfo) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self.is_resolved(), other.is_resolved()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => Ordering::Equal,
            (true, true) => (self.resolved_period_index, self.resolved_period_time_us)
                .cmp(&(other.resolved_period_index, other.resolved_period_time_us)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTarget {
        hits: AtomicUsize,
    }

    impl MessageTarget for CountingTarget {
        fn handle_message(
            &self,
            _message_type: i32,
            _payload: Option<&(dyn Any + Send + Sync)>,
        ) -> Result<(), EngineError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn message_at(window_index: usize, position_ms: i64) -> PlayerMessage {
        let target = Arc::new(CountingTarget {
            hits: AtomicUsize::new(0),
        });
        PlayerMessage::builder(target, 1)
            .at_position(window_index, position_ms)
            .build()
    }

    #[test]
    fn test_builder_defaults() {
        let target = Arc::new(CountingTarget {
            hits: AtomicUsize::new(0),
        });
        let message = PlayerMessage::builder(target, 7).build();
        assert_eq!(message.message_type(), 7);
        assert_eq!(message.position_ms(), TIME_UNSET);
        assert!(message.window_index().is_none());
        assert!(message.delete_after_delivery());
        assert!(!message.is_canceled());
        assert!(!message.is_processed());
    }

    #[test]
    fn test_cancel_and_processed() {
        let message = message_at(0, 1_000);
        message.cancel();
        assert!(message.is_canceled());
        message.mark_as_processed(false);
        assert!(!message.blocking_await_delivery());
    }

    #[test]
    fn test_blocking_await_delivered() {
        let message = message_at(0, 1_000);
        let waiter = {
            let message = message.clone();
            std::thread::spawn(move || message.blocking_await_delivery())
        };
        message.mark_as_processed(true);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_pending_ordering() {
        let mut a = PendingMessageInfo::new(message_at(0, 1_000));
        let mut b = PendingMessageInfo::new(message_at(0, 2_000));
        let c = PendingMessageInfo::new(message_at(0, 3_000));

        let uid = Uuid::new_v4();
        a.set_resolved_position(1, 500, uid);
        b.set_resolved_position(0, 9_000, uid);

        let mut list = vec![a.clone(), b.clone(), c.clone()];
        list.sort_by(|x, y| x.playback_order(y));

        // Resolved first, by (period index, time); unresolved last.
        assert_eq!(list[0].resolved_period_index, 0);
        assert_eq!(list[1].resolved_period_index, 1);
        assert!(!list[2].is_resolved());
    }
}
