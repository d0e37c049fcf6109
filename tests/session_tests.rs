use futures_util::future::FutureExt;
use perfwatch::kernel::time::{Clock, ManualClock};
use perfwatch::platform::fetch::{FetchFuture, FetchRequest, FetchResponse, FetchSlot, SharedFetch};
use perfwatch::platform::frame::ManualFrameScheduler;
use perfwatch::platform::heap::{HeapIntrospector, HeapUsage};
use perfwatch::platform::timeline::{PerformanceEntry, PerformanceTimeline};
use perfwatch::{Hosts, PerfSnapshot, TelemetryConfig, TelemetrySession};
use std::sync::Arc;
use std::time::Duration;

struct HalfGig;

impl HeapIntrospector for HalfGig {
    fn heap_usage(&self) -> Option<HeapUsage> {
        Some(HeapUsage {
            used_bytes: 512 * 1024 * 1024,
            limit_bytes: 2048 * 1024 * 1024,
        })
    }
}

struct Rig {
    frames: Arc<ManualFrameScheduler>,
    clock: Arc<ManualClock>,
    timeline: PerformanceTimeline,
    base: SharedFetch,
    slot: Arc<FetchSlot>,
}

impl Rig {
    fn new() -> Self {
        let base: SharedFetch = Arc::new(|_req: FetchRequest| -> FetchFuture {
            async { Ok(FetchResponse::with_status(200)) }.boxed()
        });
        Self {
            frames: Arc::new(ManualFrameScheduler::new()),
            clock: Arc::new(ManualClock::new(0.0)),
            timeline: PerformanceTimeline::with_all_types(),
            slot: Arc::new(FetchSlot::new(base.clone())),
            base,
        }
    }

    fn hosts(&self) -> Hosts {
        Hosts {
            frames: self.frames.clone(),
            clock: self.clock.clone(),
            heap: Arc::new(HalfGig),
            timeline: Arc::new(self.timeline.clone()),
            fetch_slot: self.slot.clone(),
        }
    }

    fn paint_second(&self) {
        for _ in 0..60 {
            self.clock.advance(1000.0 / 60.0);
            let now = self.clock.now_ms();
            self.frames.fire(now);
        }
        // Land exactly on the window boundary
        self.clock.advance(1.0);
        self.frames.fire(self.clock.now_ms());
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_aggregates_all_collectors() {
    let rig = Rig::new();
    let session = TelemetrySession::start(&TelemetryConfig::default(), rig.hosts());
    let mut updates = session.watch();

    rig.paint_second();
    rig.timeline.record(PerformanceEntry::layout_shift(40.0, 0.12, false));
    rig.slot.fetch(FetchRequest::get("https://api.test/session")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(updates.has_changed().unwrap());
    let snap = updates.borrow_and_update().clone();
    assert!(snap.fps.is_some());
    assert_eq!(snap.heap.map(|h| h.used_mb), Some(512.0));
    assert_eq!(snap.vitals.cls, Some(0.12));
    assert_eq!(snap.network.len(), 1);
    assert_eq!(snap, session.snapshot());
}

#[tokio::test(start_paused = true)]
async fn test_session_stop_tears_everything_down() {
    let rig = Rig::new();
    let session = TelemetrySession::start(&TelemetryConfig::default(), rig.hosts());
    assert_eq!(rig.frames.pending(), 1);
    assert_eq!(rig.slot.depth(), 1);
    assert!(rig.timeline.observer_count() > 0);

    session.stop();
    session.stop();
    assert!(session.is_stopped());

    assert_eq!(rig.frames.pending(), 0);
    assert_eq!(rig.slot.depth(), 0);
    assert!(Arc::ptr_eq(&rig.slot.current(), &rig.base));
    assert_eq!(rig.timeline.observer_count(), 0);

    // Nothing reaches the snapshot anymore
    rig.paint_second();
    rig.timeline.record(PerformanceEntry::layout_shift(40.0, 0.3, false));
    rig.slot.fetch(FetchRequest::get("https://api.test/after")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(session.snapshot(), PerfSnapshot::default());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_session_releases_fetch_slot() {
    let rig = Rig::new();
    {
        let _session = TelemetrySession::start(&TelemetryConfig::default(), rig.hosts());
        assert_eq!(rig.slot.depth(), 1);
    }
    assert_eq!(rig.slot.depth(), 0);
    assert!(Arc::ptr_eq(&rig.slot.current(), &rig.base));
}
