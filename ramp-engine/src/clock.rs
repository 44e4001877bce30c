//! Monotonic time sources for the engine
//!
//! Everything time-dependent in the engine reads a [`Clock`], so tests can
//! substitute a [`VirtualClock`] and drive all scheduled work explicitly.
//! Clocks never fail.
//!
//! Parking works the same way the serial worker threads elsewhere in the
//! codebase wait for work: a mutex-guarded flag plus a condvar. The clock
//! decides *how* a message loop waits for its next deadline: the system
//! clock uses a timed wait, the virtual clock parks unconditionally and
//! wakes every registered parker whenever virtual time advances.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::trace;

/// One-shot wakeup primitive used by message loops to wait for deadlines.
///
/// A notification delivered while the owner is not parked is latched, so
/// the next `park` returns immediately (no lost wakeups).
pub struct Parker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    /// Blocks until notified, or until `timeout` elapses if one is given.
    /// Consumes a pending notification.
    pub fn park(&self, timeout: Option<Duration>) {
        let mut notified = self.notified.lock().unwrap();
        if !*notified {
            match timeout {
                Some(timeout) => {
                    let (guard, _) = self.condvar.wait_timeout(notified, timeout).unwrap();
                    notified = guard;
                }
                None => {
                    while !*notified {
                        notified = self.condvar.wait(notified).unwrap();
                    }
                }
            }
        }
        *notified = false;
    }

    /// Wakes the parked owner, or latches the wakeup if it is not parked.
    pub fn unpark(&self) {
        let mut notified = self.notified.lock().unwrap();
        *notified = true;
        self.condvar.notify_one();
    }
}

/// Monotonic time source.
///
/// `elapsed_realtime_ms` and `uptime_ms` are distinct on platforms where
/// deep sleep stops the uptime clock; both are served from the same
/// monotonic source here, but callers must use `uptime_ms` for message
/// deadlines and `elapsed_realtime_ms` for media position accounting.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds of monotonic time since an arbitrary epoch.
    fn elapsed_realtime_ms(&self) -> i64;

    /// Milliseconds of monotonic time used for message-loop deadlines.
    fn uptime_ms(&self) -> i64 {
        self.elapsed_realtime_ms()
    }

    /// Registers a parker to be woken when this clock's time jumps.
    /// Real clocks never jump, so the default implementation ignores it.
    fn register_parker(&self, _parker: &Arc<Parker>) {}

    /// Parks the calling thread until woken or until `timeout_ms` of this
    /// clock's time passes (`None` = no deadline).
    fn park(&self, parker: &Parker, timeout_ms: Option<i64>);
}

/// Clock backed by [`Instant`]. The default for production use.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed_realtime_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }

    fn park(&self, parker: &Parker, timeout_ms: Option<i64>) {
        match timeout_ms {
            Some(timeout_ms) if timeout_ms <= 0 => {}
            Some(timeout_ms) => parker.park(Some(Duration::from_millis(timeout_ms as u64))),
            None => parker.park(None),
        }
    }
}

/// Virtual clock for tests: time only moves when [`advance_ms`] is called.
///
/// Message loops parked against this clock are woken on every advance and
/// re-check their deadlines against the new time, so delayed postings fire
/// in deadline order (insertion order at equal deadlines) exactly when the
/// virtual time passes them.
///
/// [`advance_ms`]: VirtualClock::advance_ms
pub struct VirtualClock {
    now_ms: Mutex<i64>,
    parkers: Mutex<Vec<Weak<Parker>>>,
}

impl VirtualClock {
    pub fn new(initial_time_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: Mutex::new(initial_time_ms),
            parkers: Mutex::new(Vec::new()),
        })
    }

    /// Advances virtual time, waking every registered message loop so work
    /// whose deadline has elapsed gets delivered.
    pub fn advance_ms(&self, delta_ms: i64) {
        assert!(delta_ms >= 0, "virtual time cannot move backwards");
        let now = {
            let mut now = self.now_ms.lock().unwrap();
            *now += delta_ms;
            *now
        };
        trace!(now_ms = now, "virtual clock advanced");
        self.wake_all();
    }

    fn wake_all(&self) {
        let mut parkers = self.parkers.lock().unwrap();
        parkers.retain(|weak| match weak.upgrade() {
            Some(parker) => {
                parker.unpark();
                true
            }
            None => false,
        });
    }
}

impl Clock for VirtualClock {
    fn elapsed_realtime_ms(&self) -> i64 {
        *self.now_ms.lock().unwrap()
    }

    fn register_parker(&self, parker: &Arc<Parker>) {
        self.parkers.lock().unwrap().push(Arc::downgrade(parker));
    }

    fn park(&self, parker: &Parker, timeout_ms: Option<i64>) {
        if timeout_ms.is_some_and(|t| t <= 0) {
            return;
        }
        // Virtual time cannot pass on its own; wait for an advance or an
        // explicit wakeup, then let the caller re-check its deadlines.
        parker.park(None);
    }
}
