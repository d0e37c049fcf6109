//! Push-based performance-entry stream.
//!
//! Hosts report paint, input, layout-shift and navigation entries to a
//! `PerformanceTimeline`; observers subscribe per entry type and receive
//! entries in record order, on the recording thread or on the next turn.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

use crate::error::{Result, TelemetryError};
use crate::kernel::lifecycle::lock;

const MAX_BUFFERED_ENTRIES: usize = 1_000;

pub const FIRST_CONTENTFUL_PAINT: &str = "first-contentful-paint";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Paint,
    LargestContentfulPaint,
    FirstInput,
    Event,
    LayoutShift,
    Navigation,
}

impl EntryType {
    pub const ALL: [EntryType; 6] = [
        EntryType::Paint,
        EntryType::LargestContentfulPaint,
        EntryType::FirstInput,
        EntryType::Event,
        EntryType::LayoutShift,
        EntryType::Navigation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Paint => "paint",
            EntryType::LargestContentfulPaint => "largest-contentful-paint",
            EntryType::FirstInput => "first-input",
            EntryType::Event => "event",
            EntryType::LayoutShift => "layout-shift",
            EntryType::Navigation => "navigation",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific payload of an entry. Times are clock milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryDetail {
    Paint,
    LargestContentfulPaint { render_time: f64, load_time: f64 },
    FirstInput { processing_start: f64 },
    Event { processing_start: f64, interaction_id: u64 },
    LayoutShift { value: f64, had_recent_input: bool },
    Navigation { request_start: f64, response_start: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub name: String,
    pub start_time: f64,
    pub duration: f64,
    pub detail: EntryDetail,
}

impl PerformanceEntry {
    pub fn entry_type(&self) -> EntryType {
        match self.detail {
            EntryDetail::Paint => EntryType::Paint,
            EntryDetail::LargestContentfulPaint { .. } => EntryType::LargestContentfulPaint,
            EntryDetail::FirstInput { .. } => EntryType::FirstInput,
            EntryDetail::Event { .. } => EntryType::Event,
            EntryDetail::LayoutShift { .. } => EntryType::LayoutShift,
            EntryDetail::Navigation { .. } => EntryType::Navigation,
        }
    }

    pub fn paint(name: &str, start_time: f64) -> Self {
        Self {
            name: name.to_string(),
            start_time,
            duration: 0.0,
            detail: EntryDetail::Paint,
        }
    }

    pub fn largest_contentful_paint(start_time: f64, render_time: f64, load_time: f64) -> Self {
        Self {
            name: String::new(),
            start_time,
            duration: 0.0,
            detail: EntryDetail::LargestContentfulPaint { render_time, load_time },
        }
    }

    pub fn first_input(name: &str, start_time: f64, processing_start: f64) -> Self {
        Self {
            name: name.to_string(),
            start_time,
            duration: 0.0,
            detail: EntryDetail::FirstInput { processing_start },
        }
    }

    pub fn event(name: &str, start_time: f64, duration: f64, interaction_id: u64) -> Self {
        Self {
            name: name.to_string(),
            start_time,
            duration,
            detail: EntryDetail::Event {
                processing_start: start_time,
                interaction_id,
            },
        }
    }

    pub fn layout_shift(start_time: f64, value: f64, had_recent_input: bool) -> Self {
        Self {
            name: String::new(),
            start_time,
            duration: 0.0,
            detail: EntryDetail::LayoutShift { value, had_recent_input },
        }
    }

    pub fn navigation(url: &str, request_start: f64, response_start: f64) -> Self {
        Self {
            name: url.to_string(),
            start_time: 0.0,
            duration: 0.0,
            detail: EntryDetail::Navigation { request_start, response_start },
        }
    }
}

pub type EntrySink = Arc<dyn Fn(&PerformanceEntry) + Send + Sync>;

/// Handle to one established observation. Disconnecting is idempotent.
pub trait Subscription: Send {
    fn disconnect(&mut self);
}

/// Push-based performance-entry subscription capability.
pub trait EntryObserverHost: Send + Sync {
    /// Rejects entry types the host does not support. With `buffered`, entries
    /// recorded before the call are delivered to `sink` first, on a later turn.
    fn observe(&self, entry_type: EntryType, buffered: bool, sink: EntrySink) -> Result<Box<dyn Subscription>>;
}

/// Ordered delivery queue of one observer.
///
/// Entries are enqueued under the timeline's buffer lock, so every lane sees
/// them in record order. Only one thread delivers a lane at a time; a thread
/// that finds the lane busy leaves its entry for the active deliverer.
struct ObserverLane {
    entry_type: EntryType,
    sink: EntrySink,
    queue: Mutex<VecDeque<PerformanceEntry>>,
    delivering: AtomicBool,
    closed: AtomicBool,
}

struct DeliveryGuard<'a>(&'a AtomicBool);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ObserverLane {
    fn drain(&self) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
            {
                let _guard = DeliveryGuard(&self.delivering);
                loop {
                    let next = lock(&self.queue).pop_front();
                    let Some(entry) = next else {
                        break;
                    };
                    if !self.closed.load(Ordering::Acquire) {
                        (self.sink)(&entry);
                    }
                }
            }
            // An entry may have landed between the last pop and the release.
            if lock(&self.queue).is_empty() {
                return;
            }
        }
    }
}

#[derive(Default)]
struct TimelineInner {
    supported: HashSet<EntryType>,
    next_id: AtomicU64,
    // Lock order: buffer, then observers, then a lane queue.
    buffer: Mutex<VecDeque<PerformanceEntry>>,
    observers: Mutex<HashMap<u64, Arc<ObserverLane>>>,
}

impl TimelineInner {
    fn lanes(&self) -> Vec<Arc<ObserverLane>> {
        lock(&self.observers).values().cloned().collect()
    }
}

/// In-process performance timeline.
#[derive(Clone)]
pub struct PerformanceTimeline {
    inner: Arc<TimelineInner>,
}

impl PerformanceTimeline {
    pub fn new(supported: impl IntoIterator<Item = EntryType>) -> Self {
        Self {
            inner: Arc::new(TimelineInner {
                supported: supported.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    pub fn with_all_types() -> Self {
        Self::new(EntryType::ALL)
    }

    pub fn supports(&self, entry_type: EntryType) -> bool {
        self.inner.supported.contains(&entry_type)
    }

    /// Record an entry and push it to every observer of its type, after any
    /// replay still queued for them. Entries of unsupported types are dropped;
    /// returns whether it was kept.
    pub fn record(&self, entry: PerformanceEntry) -> bool {
        let entry_type = entry.entry_type();
        if !self.supports(entry_type) {
            debug!(%entry_type, "dropping entry of unsupported type");
            return false;
        }

        let lanes = {
            let mut buffer = lock(&self.inner.buffer);
            if buffer.len() >= MAX_BUFFERED_ENTRIES {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());

            let observers = lock(&self.inner.observers);
            for lane in observers.values().filter(|lane| lane.entry_type == entry_type) {
                lock(&lane.queue).push_back(entry.clone());
            }
            observers.values().cloned().collect::<Vec<_>>()
        };

        for lane in lanes {
            lane.drain();
        }
        true
    }

    /// Deliver every queued entry, buffered replays included. This is the
    /// host's "next turn" when no tokio runtime is around to do it.
    pub fn deliver_pending(&self) {
        for lane in self.inner.lanes() {
            lane.drain();
        }
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.inner.observers).len()
    }
}

impl EntryObserverHost for PerformanceTimeline {
    fn observe(&self, entry_type: EntryType, buffered: bool, sink: EntrySink) -> Result<Box<dyn Subscription>> {
        if !self.supports(entry_type) {
            return Err(TelemetryError::UnsupportedEntryType(entry_type));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let lane = {
            let buffer = lock(&self.inner.buffer);
            let replay: VecDeque<PerformanceEntry> = if buffered {
                buffer.iter().filter(|e| e.entry_type() == entry_type).cloned().collect()
            } else {
                VecDeque::new()
            };
            let lane = Arc::new(ObserverLane {
                entry_type,
                sink,
                queue: Mutex::new(replay),
                delivering: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            });
            lock(&self.inner.observers).insert(id, lane.clone());
            lane
        };

        // Replay never runs inside observe(); without a runtime it waits for
        // the next record() or deliver_pending().
        if !lock(&lane.queue).is_empty() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let pending = lane.clone();
                handle.spawn(async move { pending.drain() });
            }
        }

        Ok(Box::new(TimelineSubscription {
            id: Some(id),
            lane,
            timeline: Arc::downgrade(&self.inner),
        }))
    }
}

struct TimelineSubscription {
    id: Option<u64>,
    lane: Arc<ObserverLane>,
    timeline: Weak<TimelineInner>,
}

impl Subscription for TimelineSubscription {
    fn disconnect(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        self.lane.closed.store(true, Ordering::Release);
        lock(&self.lane.queue).clear();
        if let Some(inner) = self.timeline.upgrade() {
            lock(&inner.observers).remove(&id);
        }
    }
}

impl Drop for TimelineSubscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}
