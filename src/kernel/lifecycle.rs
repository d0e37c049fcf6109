//! Start/stop contract shared by every collector.
//!
//! # INVARIANT
//! Once `StopHandle::stop()` returns, the collector's `on_update` callback is
//! never entered again. In-flight emissions finish before `stop()` returns,
//! unless `stop()` is called from inside that same callback.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

static NEXT_EMITTER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Emitters whose callback is currently running on this thread.
    static EMITTING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Sink<T> = Box<dyn FnMut(T) + Send>;

/// Delivers updates to a consumer callback while the collector is live.
pub(crate) struct Emitter<T> {
    id: u64,
    alive: AtomicBool,
    sink: Mutex<Option<Sink<T>>>,
}

impl<T> Emitter<T> {
    pub fn new<F>(on_update: F) -> Arc<Self>
    where
        F: FnMut(T) + Send + 'static,
    {
        Arc::new(Self {
            id: NEXT_EMITTER_ID.fetch_add(1, Ordering::Relaxed),
            alive: AtomicBool::new(true),
            sink: Mutex::new(Some(Box::new(on_update))),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Returns false if the update was dropped because the emitter is closed.
    pub fn emit(&self, value: T) -> bool {
        if !self.is_alive() {
            return false;
        }
        let mut guard = lock(&self.sink);
        // Re-check under the lock: close() may have won the race.
        if !self.is_alive() {
            return false;
        }
        let Some(sink) = guard.as_mut() else {
            return false;
        };
        let _scope = EmitScope::enter(self.id);
        sink(value);
        true
    }
}

struct EmitScope(u64);

impl EmitScope {
    fn enter(id: u64) -> Self {
        EMITTING.with(|ids| ids.borrow_mut().push(id));
        Self(id)
    }
}

impl Drop for EmitScope {
    fn drop(&mut self) {
        EMITTING.with(|ids| {
            let mut ids = ids.borrow_mut();
            if let Some(pos) = ids.iter().rposition(|id| *id == self.0) {
                ids.remove(pos);
            }
        });
    }
}

/// Type-erased view of an emitter, so a `StopHandle` can close any of them.
pub(crate) trait Liveness: Send + Sync {
    fn close(&self);
}

impl<T> Liveness for Emitter<T> {
    fn close(&self) {
        self.alive.store(false, Ordering::Release);
        let reentrant = EMITTING.with(|ids| ids.borrow().contains(&self.id));
        if !reentrant {
            // Waits for any emission in flight on another thread, then drops the callback.
            lock(&self.sink).take();
        }
    }
}

struct StopInner {
    collector: &'static str,
    liveness: Arc<dyn Liveness>,
    teardown: Vec<Box<dyn FnOnce() + Send>>,
}

/// Opaque cancellation handle returned by every `start()`.
///
/// `stop()` may be called any number of times. Dropping the handle stops the
/// collector as well.
#[must_use = "dropping a StopHandle stops the collector"]
pub struct StopHandle {
    inner: Mutex<Option<StopInner>>,
}

impl StopHandle {
    pub(crate) fn new(collector: &'static str, liveness: Arc<dyn Liveness>) -> Self {
        Self {
            inner: Mutex::new(Some(StopInner {
                collector,
                liveness,
                teardown: Vec::new(),
            })),
        }
    }

    /// Register a release step. Steps run in registration order after the
    /// emitter is closed.
    pub(crate) fn on_stop<F>(self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(inner) = lock(&self.inner).as_mut() {
            inner.teardown.push(Box::new(f));
        }
        self
    }

    pub fn stop(&self) {
        let Some(inner) = lock(&self.inner).take() else {
            return;
        };
        inner.liveness.close();
        for step in inner.teardown {
            step();
        }
        debug!(collector = inner.collector, "collector stopped");
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.inner).is_none()
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
