use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic high-resolution clock in milliseconds since an arbitrary origin.
/// Readings never decrease within a session.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Wall-independent clock backed by `Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Clock that only moves when told to. Used to drive collectors deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self { bits: AtomicU64::new(start_ms.to_bits()) }
    }

    /// Jump to an absolute reading. Going backwards is ignored.
    pub fn set(&self, ms: f64) {
        let _ = self.bits.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
            (ms > f64::from_bits(cur)).then(|| ms.to_bits())
        });
    }

    pub fn advance(&self, delta_ms: f64) {
        let _ = self.bits.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
            Some((f64::from_bits(cur) + delta_ms.max(0.0)).to_bits())
        });
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Milliseconds since the Unix epoch, for record timestamps.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
