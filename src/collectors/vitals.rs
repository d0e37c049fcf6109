//! Core Web Vitals reduced from push-based entry streams.
//!
//! Every metric owns its own subscription. A host that rejects one entry type
//! leaves that metric `None` for the session; the others attach normally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::Collector;
use crate::kernel::lifecycle::{lock, Emitter, StopHandle};
use crate::platform::timeline::{
    EntryDetail, EntryObserverHost, EntrySink, EntryType, PerformanceEntry, Subscription,
    FIRST_CONTENTFUL_PAINT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Lcp,
    Fid,
    Inp,
    Cls,
    Fcp,
    Ttfb,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Lcp,
        Metric::Fid,
        Metric::Inp,
        Metric::Cls,
        Metric::Fcp,
        Metric::Ttfb,
    ];

    pub fn entry_type(&self) -> EntryType {
        match self {
            Metric::Lcp => EntryType::LargestContentfulPaint,
            Metric::Fid => EntryType::FirstInput,
            Metric::Inp => EntryType::Event,
            Metric::Cls => EntryType::LayoutShift,
            Metric::Fcp => EntryType::Paint,
            Metric::Ttfb => EntryType::Navigation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Lcp => "lcp",
            Metric::Fid => "fid",
            Metric::Inp => "inp",
            Metric::Cls => "cls",
            Metric::Fcp => "fcp",
            Metric::Ttfb => "ttfb",
        }
    }

    /// Fold one entry into the current value. Returns the new value only when
    /// it differs from `current`.
    pub fn reduce(&self, current: Option<f64>, entry: &PerformanceEntry) -> Option<f64> {
        let next = match (self, &entry.detail) {
            // Latest candidate wins.
            (Metric::Lcp, EntryDetail::LargestContentfulPaint { render_time, load_time }) => {
                Some(if *render_time > 0.0 {
                    *render_time
                } else if *load_time > 0.0 {
                    *load_time
                } else {
                    entry.start_time
                })
            }
            (Metric::Fid, EntryDetail::FirstInput { processing_start }) if current.is_none() => {
                Some((processing_start - entry.start_time).max(0.0))
            }
            // Worst interaction so far.
            (Metric::Inp, EntryDetail::Event { interaction_id, .. }) if *interaction_id > 0 => {
                match current {
                    Some(worst) if worst >= entry.duration => None,
                    _ => Some(entry.duration),
                }
            }
            // Input-triggered shifts do not count.
            (Metric::Cls, EntryDetail::LayoutShift { value, had_recent_input: false }) => {
                Some(current.unwrap_or(0.0) + value)
            }
            (Metric::Fcp, EntryDetail::Paint) if current.is_none() && entry.name == FIRST_CONTENTFUL_PAINT => {
                Some(entry.start_time)
            }
            (Metric::Ttfb, EntryDetail::Navigation { response_start, .. }) if current.is_none() => {
                Some(response_start.max(0.0))
            }
            _ => None,
        };

        next.filter(|value| current != Some(*value))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalsUpdate {
    pub metric: Metric,
    pub value: f64,
}

/// Current value of every metric; `None` until first observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalsSnapshot {
    pub lcp: Option<f64>,
    pub fid: Option<f64>,
    pub cls: Option<f64>,
    pub inp: Option<f64>,
    pub fcp: Option<f64>,
    pub ttfb: Option<f64>,
}

impl VitalsSnapshot {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Lcp => self.lcp,
            Metric::Fid => self.fid,
            Metric::Inp => self.inp,
            Metric::Cls => self.cls,
            Metric::Fcp => self.fcp,
            Metric::Ttfb => self.ttfb,
        }
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        let field = match metric {
            Metric::Lcp => &mut self.lcp,
            Metric::Fid => &mut self.fid,
            Metric::Inp => &mut self.inp,
            Metric::Cls => &mut self.cls,
            Metric::Fcp => &mut self.fcp,
            Metric::Ttfb => &mut self.ttfb,
        };
        *field = Some(value);
    }
}

/// Per-metric subscriptions of one observation session.
#[derive(Default)]
struct SubscriptionRegistry {
    handles: HashMap<Metric, Box<dyn Subscription>>,
}

impl SubscriptionRegistry {
    fn insert(&mut self, metric: Metric, subscription: Box<dyn Subscription>) {
        self.handles.insert(metric, subscription);
    }

    fn attached(&self) -> usize {
        self.handles.len()
    }

    fn disconnect_all(&mut self) {
        for (_, mut subscription) in self.handles.drain() {
            subscription.disconnect();
        }
    }
}

pub struct VitalsObserver {
    host: Arc<dyn EntryObserverHost>,
    metrics: Vec<Metric>,
    current: Mutex<Arc<Mutex<VitalsSnapshot>>>,
}

impl VitalsObserver {
    pub fn new(host: Arc<dyn EntryObserverHost>) -> Self {
        Self {
            host,
            metrics: Metric::ALL.to_vec(),
            current: Mutex::new(Arc::new(Mutex::new(VitalsSnapshot::default()))),
        }
    }

    /// Restrict observation to a subset of metrics.
    pub fn with_metrics(mut self, metrics: &[Metric]) -> Self {
        self.metrics = metrics.to_vec();
        self
    }

    /// Live values of the most recently started session.
    pub fn snapshot(&self) -> VitalsSnapshot {
        let live = lock(&self.current).clone();
        let snapshot = lock(&live).clone();
        snapshot
    }
}

impl Collector for VitalsObserver {
    type Update = VitalsUpdate;

    /// Each start begins a fresh snapshot. Buffered entries are replayed into
    /// it by the host on a later turn, never from inside `start()`.
    fn start<F>(&self, on_update: F) -> StopHandle
    where
        F: FnMut(VitalsUpdate) + Send + 'static,
    {
        let emitter = Emitter::new(on_update);
        let live = Arc::new(Mutex::new(VitalsSnapshot::default()));
        *lock(&self.current) = live.clone();

        let mut registry = SubscriptionRegistry::default();
        for &metric in &self.metrics {
            let sink_emitter = emitter.clone();
            let sink_live = live.clone();
            // The host hands one subscription its entries one at a time, so a
            // metric's updates leave in the order they were reduced.
            let sink: EntrySink = Arc::new(move |entry: &PerformanceEntry| {
                if !sink_emitter.is_alive() {
                    return;
                }
                let changed = {
                    let mut snapshot = lock(&sink_live);
                    let next = metric.reduce(snapshot.get(metric), entry);
                    if let Some(value) = next {
                        snapshot.set(metric, value);
                    }
                    next
                };
                if let Some(value) = changed {
                    sink_emitter.emit(VitalsUpdate { metric, value });
                }
            });

            match self.host.observe(metric.entry_type(), true, sink) {
                Ok(subscription) => registry.insert(metric, subscription),
                Err(err) => debug!(%metric, error = %err, "metric unavailable on this host"),
            }
        }
        debug!(attached = registry.attached(), requested = self.metrics.len(), "vitals observer started");

        StopHandle::new("vitals", emitter).on_stop(move || registry.disconnect_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fid_only_takes_the_first_input() {
        let first = PerformanceEntry::first_input("pointerdown", 100.0, 112.0);
        let second = PerformanceEntry::first_input("keydown", 200.0, 260.0);

        let fid = Metric::Fid.reduce(None, &first);
        assert_eq!(fid, Some(12.0));
        assert_eq!(Metric::Fid.reduce(fid, &second), None);
    }

    #[test]
    fn inp_ignores_non_interactions() {
        let hover = PerformanceEntry::event("pointerover", 10.0, 900.0, 0);
        assert_eq!(Metric::Inp.reduce(None, &hover), None);
    }

    #[test]
    fn lcp_prefers_render_time() {
        let entry = PerformanceEntry::largest_contentful_paint(50.0, 0.0, 80.0);
        assert_eq!(Metric::Lcp.reduce(None, &entry), Some(80.0));
        let entry = PerformanceEntry::largest_contentful_paint(50.0, 95.0, 80.0);
        assert_eq!(Metric::Lcp.reduce(Some(80.0), &entry), Some(95.0));
    }

    #[test]
    fn fcp_ignores_other_paints() {
        let first_paint = PerformanceEntry::paint("first-paint", 30.0);
        assert_eq!(Metric::Fcp.reduce(None, &first_paint), None);
        let fcp = PerformanceEntry::paint(FIRST_CONTENTFUL_PAINT, 42.0);
        assert_eq!(Metric::Fcp.reduce(None, &fcp), Some(42.0));
    }
}
