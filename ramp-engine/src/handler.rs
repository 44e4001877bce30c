//! Single-threaded message loops
//!
//! A [`Handler`] is the write side of a message loop bound to one worker
//! thread: callers enqueue typed messages or closures, immediately or for
//! a later uptime, and the owning thread drains them strictly in order via
//! [`MessageLoop::next`]. Delivery is FIFO at equal scheduled time, with
//! ties broken by insertion order. Removal of pending typed messages by
//! kind is best-effort and idempotent.
//!
//! Deadlines are read from the [`Clock`], so a loop driven by a
//! [`crate::clock::VirtualClock`] only fires delayed postings when the
//! test advances virtual time.

use crate::clock::{Clock, Parker};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Typed message deliverable through a [`Handler`].
///
/// `kind` groups messages for [`Handler::remove_messages`]; it does not
/// affect ordering.
pub trait HandlerMessage: Send + 'static {
    fn kind(&self) -> u32;
}

/// Anything a handler can deliver: a typed message for the loop's single
/// consumer, or a closure executed inline by the loop.
enum Envelope<M> {
    Message(M),
    Task(Box<dyn FnOnce() + Send>),
}

struct Delayed<M> {
    due_ms: i64,
    seq: u64,
    envelope: Envelope<M>,
}

impl<M> PartialEq for Delayed<M> {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.seq == other.seq
    }
}

impl<M> Eq for Delayed<M> {}

impl<M> Ord for Delayed<M> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, the earliest deadline (then
        // the earliest insertion) must surface first.
        (other.due_ms, other.seq).cmp(&(self.due_ms, self.seq))
    }
}

impl<M> PartialOrd for Delayed<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct HandlerState<M> {
    immediate: VecDeque<Envelope<M>>,
    delayed: BinaryHeap<Delayed<M>>,
    next_seq: u64,
    quitting: bool,
}

struct HandlerShared<M> {
    id: u64,
    name: &'static str,
    clock: Arc<dyn Clock>,
    state: Mutex<HandlerState<M>>,
    parker: Arc<Parker>,
}

/// Write side of a message loop. Cheap to clone; all clones feed the same
/// worker.
pub struct Handler<M> {
    shared: Arc<HandlerShared<M>>,
}

impl<M> Clone for Handler<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Read side of a message loop, owned by exactly one worker thread.
pub struct MessageLoop<M> {
    shared: Arc<HandlerShared<M>>,
}

/// Creates a connected handler/loop pair scheduled against `clock`.
pub fn message_loop<M: HandlerMessage>(
    name: &'static str,
    clock: Arc<dyn Clock>,
) -> (Handler<M>, MessageLoop<M>) {
    let parker = Parker::new();
    clock.register_parker(&parker);
    let shared = Arc::new(HandlerShared {
        id: NEXT_HANDLER_ID.fetch_add(1, AtomicOrdering::Relaxed),
        name,
        clock,
        state: Mutex::new(HandlerState {
            immediate: VecDeque::new(),
            delayed: BinaryHeap::new(),
            next_seq: 0,
            quitting: false,
        }),
        parker,
    });
    (
        Handler {
            shared: Arc::clone(&shared),
        },
        MessageLoop { shared },
    )
}

impl<M: HandlerMessage> Handler<M> {
    /// Identity of the loop this handler feeds, for same-thread checks.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Enqueues a message for as-soon-as-possible delivery.
    /// Returns false if the loop has quit.
    pub fn send(&self, message: M) -> bool {
        self.enqueue(Envelope::Message(message), None)
    }

    /// Enqueues a message for delivery once the clock's uptime reaches
    /// `uptime_ms`. A deadline already in the past delivers immediately,
    /// after everything already enqueued.
    pub fn send_at(&self, message: M, uptime_ms: i64) -> bool {
        self.enqueue(Envelope::Message(message), Some(uptime_ms))
    }

    /// Enqueues a message `delay_ms` from now.
    pub fn send_delayed(&self, message: M, delay_ms: i64) -> bool {
        let uptime = self.shared.clock.uptime_ms() + delay_ms.max(0);
        self.send_at(message, uptime)
    }

    /// Enqueues a closure for execution on the loop thread.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.enqueue(Envelope::Task(Box::new(task)), None)
    }

    /// Enqueues a closure for execution `delay_ms` from now.
    pub fn post_delayed(&self, task: impl FnOnce() + Send + 'static, delay_ms: i64) -> bool {
        let uptime = self.shared.clock.uptime_ms() + delay_ms.max(0);
        self.enqueue(Envelope::Task(Box::new(task)), Some(uptime))
    }

    /// Removes every pending typed message of the given kind, immediate or
    /// delayed. Best-effort: a message already handed to the loop is not
    /// recalled. Idempotent.
    pub fn remove_messages(&self, kind: u32) {
        let mut state = self.shared.state.lock().unwrap();
        state
            .immediate
            .retain(|e| !matches!(e, Envelope::Message(m) if m.kind() == kind));
        let kept: Vec<Delayed<M>> = state
            .delayed
            .drain()
            .filter(|d| !matches!(&d.envelope, Envelope::Message(m) if m.kind() == kind))
            .collect();
        state.delayed.extend(kept);
    }

    /// Marks the loop as quitting: pending work is dropped and
    /// [`MessageLoop::next`] returns `None`.
    pub fn quit(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.quitting {
                return;
            }
            state.quitting = true;
            state.immediate.clear();
            state.delayed.clear();
        }
        debug!(handler = self.shared.name, "message loop quitting");
        self.shared.parker.unpark();
    }

    fn enqueue(&self, envelope: Envelope<M>, due_ms: Option<i64>) -> bool {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.quitting {
                return false;
            }
            match due_ms {
                Some(due_ms) if due_ms > self.shared.clock.uptime_ms() => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.delayed.push(Delayed {
                        due_ms,
                        seq,
                        envelope,
                    });
                }
                _ => state.immediate.push_back(envelope),
            }
        }
        self.shared.parker.unpark();
        true
    }
}

impl<M: HandlerMessage> MessageLoop<M> {
    /// Identity shared with the handlers feeding this loop.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Blocks until the next typed message is due and returns it, running
    /// any posted closures that come up in between. Returns `None` once
    /// the handler has quit.
    pub fn next(&mut self) -> Option<M> {
        loop {
            let timeout_ms;
            {
                let mut state = self.shared.state.lock().unwrap();
                if state.quitting {
                    return None;
                }
                let now = self.shared.clock.uptime_ms();
                while state.delayed.peek().is_some_and(|d| d.due_ms <= now) {
                    let due = state.delayed.pop().unwrap();
                    state.immediate.push_back(due.envelope);
                }
                if let Some(envelope) = state.immediate.pop_front() {
                    match envelope {
                        Envelope::Message(message) => return Some(message),
                        Envelope::Task(task) => {
                            drop(state);
                            task();
                            continue;
                        }
                    }
                }
                timeout_ms = state.delayed.peek().map(|d| d.due_ms - now);
            }
            self.shared.clock.park(&self.shared.parker, timeout_ms);
        }
    }
}

/// Identity-carrying executor for closures, used to route deliveries to a
/// particular thread's loop.
pub trait TaskExecutor: Send + Sync {
    fn post_task(&self, task: Box<dyn FnOnce() + Send>) -> bool;
    fn executor_id(&self) -> u64;
}

impl<M: HandlerMessage> TaskExecutor for Handler<M> {
    fn post_task(&self, task: Box<dyn FnOnce() + Send>) -> bool {
        self.enqueue(Envelope::Task(task), None)
    }

    fn executor_id(&self) -> u64 {
        self.id()
    }
}

/// Message type for loops that only ever execute posted closures.
pub enum NoMessage {}

impl HandlerMessage for NoMessage {
    fn kind(&self) -> u32 {
        match *self {}
    }
}

/// A dedicated worker thread that executes posted closures in order.
///
/// This is the delivery vehicle for timed player messages whose target
/// wants to run on its own thread rather than on the playback worker.
pub struct TaskQueue {
    handler: Handler<NoMessage>,
    worker: Option<JoinHandle<()>>,
}

impl TaskQueue {
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        let (handler, mut message_loop) = message_loop::<NoMessage>(name, clock);
        let worker = thread::Builder::new()
            .name(format!("ramp:{name}"))
            .spawn(move || {
                // Only closures flow through this loop; next() returns once
                // the handler quits.
                while message_loop.next().is_some() {}
            })
            .expect("failed to spawn task queue thread");
        Self {
            handler,
            worker: Some(worker),
        }
    }

    pub fn handler(&self) -> Handler<NoMessage> {
        self.handler.clone()
    }

    pub fn executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::new(self.handler.clone())
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.handler.quit();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("task queue worker panicked during shutdown");
            }
        }
    }
}
