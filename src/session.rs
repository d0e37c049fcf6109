//! Consumer-side aggregate of the four collectors.
//!
//! Holds the latest value from every collector in one `PerfSnapshot` and
//! publishes it on a watch channel. Stopping the session stops all four.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::collectors::{
    CallInterceptor, Collector, FrameRateSampler, HeapSample, HeapSampler, NetworkRecord, VitalsObserver,
    VitalsSnapshot,
};
use crate::config::TelemetryConfig;
use crate::kernel::lifecycle::StopHandle;
use crate::kernel::time::{Clock, MonotonicClock};
use crate::platform::fetch::{self, FetchSlot};
use crate::platform::frame::{FrameScheduler, TokioFrameScheduler};
use crate::platform::heap::{HeapIntrospector, ProcfsHeap};
use crate::platform::timeline::{EntryObserverHost, PerformanceTimeline};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfSnapshot {
    pub fps: Option<u32>,
    pub heap: Option<HeapSample>,
    pub vitals: VitalsSnapshot,
    pub network: Vec<NetworkRecord>,
}

/// The host capabilities a session runs against.
#[derive(Clone)]
pub struct Hosts {
    pub frames: Arc<dyn FrameScheduler>,
    pub clock: Arc<dyn Clock>,
    pub heap: Arc<dyn HeapIntrospector>,
    pub timeline: Arc<dyn EntryObserverHost>,
    pub fetch_slot: Arc<FetchSlot>,
}

impl Hosts {
    /// Native hosts: tokio paint driver, procfs heap, the process-wide fetch
    /// slot and the given timeline. Must be called inside a tokio runtime.
    pub fn native(config: &TelemetryConfig, timeline: PerformanceTimeline) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        Self {
            frames: Arc::new(TokioFrameScheduler::spawn(config.frame_period(), clock.clone())),
            clock,
            heap: Arc::new(ProcfsHeap::default()),
            timeline: Arc::new(timeline),
            fetch_slot: fetch::global(),
        }
    }
}

pub struct TelemetrySession {
    snapshot: watch::Sender<PerfSnapshot>,
    handles: Vec<StopHandle>,
}

impl TelemetrySession {
    pub fn start(config: &TelemetryConfig, hosts: Hosts) -> Self {
        let (tx, _rx) = watch::channel(PerfSnapshot::default());
        let mut handles = Vec::with_capacity(4);

        let fps_tx = tx.clone();
        handles.push(
            FrameRateSampler::new(hosts.frames.clone(), hosts.clock.clone())
                .with_window(std::time::Duration::from_millis(config.frame_window_ms))
                .start(move |sample| fps_tx.send_modify(|s| s.fps = Some(sample.fps))),
        );

        let heap_tx = tx.clone();
        handles.push(
            HeapSampler::new(hosts.heap.clone())
                .with_interval(config.heap_interval())
                .start(move |sample| heap_tx.send_modify(|s| s.heap = sample)),
        );

        let vitals_tx = tx.clone();
        handles.push(
            VitalsObserver::new(hosts.timeline.clone())
                .start(move |update| vitals_tx.send_modify(|s| s.vitals.set(update.metric, update.value))),
        );

        let network_tx = tx.clone();
        handles.push(
            CallInterceptor::new(hosts.fetch_slot.clone(), hosts.clock.clone())
                .with_capacity(config.history_capacity)
                .start(move |records| network_tx.send_modify(|s| s.network = records)),
        );

        info!(collectors = handles.len(), "telemetry session started");
        Self { snapshot: tx, handles }
    }

    pub fn snapshot(&self) -> PerfSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every update from any collector.
    pub fn watch(&self) -> watch::Receiver<PerfSnapshot> {
        self.snapshot.subscribe()
    }

    /// Tear down all four collectors. Idempotent.
    pub fn stop(&self) {
        if self.handles.iter().all(StopHandle::is_stopped) {
            return;
        }
        for handle in &self.handles {
            handle.stop();
        }
        info!("telemetry session stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.handles.iter().all(StopHandle::is_stopped)
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        self.stop();
    }
}
