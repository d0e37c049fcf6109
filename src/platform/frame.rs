use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::kernel::lifecycle::lock;
use crate::kernel::time::Clock;

/// Invoked once with the frame timestamp (clock milliseconds).
pub type FrameCallback = Box<dyn FnOnce(f64) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameToken(u64);

/// Per-frame scheduling primitive: runs a callback once before the next paint.
pub trait FrameScheduler: Send + Sync {
    fn request_frame(&self, callback: FrameCallback) -> FrameToken;

    /// Cancelling an unknown or already-fired token is a no-op.
    fn cancel_frame(&self, token: FrameToken);
}

/// Frame queue advanced explicitly with `fire`.
#[derive(Default)]
pub struct ManualFrameScheduler {
    next: AtomicU64,
    pending: Mutex<Vec<(FrameToken, FrameCallback)>>,
}

impl ManualFrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one paint: every callback requested before this call fires with
    /// `timestamp`. Callbacks requested during the paint wait for the next one.
    pub fn fire(&self, timestamp: f64) -> usize {
        let batch = std::mem::take(&mut *lock(&self.pending));
        let fired = batch.len();
        for (_, callback) in batch {
            callback(timestamp);
        }
        fired
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl FrameScheduler for ManualFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameToken {
        let token = FrameToken(self.next.fetch_add(1, Ordering::Relaxed));
        lock(&self.pending).push((token, callback));
        token
    }

    fn cancel_frame(&self, token: FrameToken) {
        lock(&self.pending).retain(|(t, _)| *t != token);
    }
}

/// Native paint driver: a tokio task fires the frame queue at a fixed refresh
/// period. Late ticks are skipped, like a compositor dropping frames.
pub struct TokioFrameScheduler {
    queue: Arc<ManualFrameScheduler>,
    shutdown: CancellationToken,
}

impl TokioFrameScheduler {
    /// Must be called from within a tokio runtime.
    pub fn spawn(period: Duration, clock: Arc<dyn Clock>) -> Self {
        let queue = Arc::new(ManualFrameScheduler::new());
        let shutdown = CancellationToken::new();

        let driver_queue = queue.clone();
        let driver_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut cadence = interval(period);
            cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = driver_shutdown.cancelled() => break,
                    _ = cadence.tick() => {
                        driver_queue.fire(clock.now_ms());
                    }
                }
            }
            debug!("frame driver stopped");
        });

        Self { queue, shutdown }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TokioFrameScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl FrameScheduler for TokioFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameToken {
        self.queue.request_frame(callback)
    }

    fn cancel_frame(&self, token: FrameToken) {
        self.queue.cancel_frame(token)
    }
}
