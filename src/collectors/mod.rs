//! The four telemetry collectors.
//!
//! Collectors are independent: none reads another's state, and each can be
//! started and stopped on its own. `start()` only registers a callback, timer,
//! subscription or interception; all measurement happens later.

pub mod frame_rate;
pub mod heap;
pub mod network;
pub mod vitals;

use crate::kernel::lifecycle::StopHandle;

pub use frame_rate::{FrameRateSample, FrameRateSampler};
pub use heap::{HeapSample, HeapSampler};
pub use network::{CallInterceptor, NetworkHistory, NetworkRecord};
pub use vitals::{Metric, VitalsObserver, VitalsSnapshot, VitalsUpdate};

/// Common start/subscribe contract.
pub trait Collector {
    type Update: Send + 'static;

    /// Begin collecting. `on_update` receives updates in the order the
    /// underlying events occurred until the returned handle is stopped.
    fn start<F>(&self, on_update: F) -> StopHandle
    where
        F: FnMut(Self::Update) + Send + 'static;
}
