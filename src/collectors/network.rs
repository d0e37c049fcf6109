use futures_util::future::FutureExt;
use ringbuf::traits::{Consumer, RingBuffer};
use ringbuf::HeapRb;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::Collector;
use crate::config::DEFAULT_HISTORY_CAPACITY;
use crate::kernel::lifecycle::{lock, Emitter, StopHandle};
use crate::kernel::time::{epoch_ms, Clock};
use crate::platform::fetch::{Fetch, FetchFuture, FetchRequest, FetchSlot, SharedFetch};

/// One completed outbound call. `status` is 0 when the transport failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub url: String,
    pub status: u16,
    pub duration_ms: f64,
    pub timestamp: u64,
}

/// Fixed-capacity history; the oldest record is overwritten on overflow.
pub struct NetworkHistory {
    ring: HeapRb<NetworkRecord>,
}

impl NetworkHistory {
    /// `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    pub fn push(&mut self, record: NetworkRecord) {
        self.ring.push_overwrite(record);
    }

    /// Records newest-first.
    pub fn newest_first(&self) -> Vec<NetworkRecord> {
        let mut records: Vec<NetworkRecord> = self.ring.iter().cloned().collect();
        records.reverse();
        records
    }
}

/// Observes every call made through a `FetchSlot` by leasing the slot.
pub struct CallInterceptor {
    slot: Arc<FetchSlot>,
    clock: Arc<dyn Clock>,
    capacity: usize,
}

impl CallInterceptor {
    pub fn new(slot: Arc<FetchSlot>, clock: Arc<dyn Clock>) -> Self {
        Self {
            slot,
            clock,
            capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

struct InterceptingFetch {
    original: SharedFetch,
    clock: Arc<dyn Clock>,
    history: Arc<Mutex<NetworkHistory>>,
    emitter: Arc<Emitter<Vec<NetworkRecord>>>,
}

impl Fetch for InterceptingFetch {
    fn fetch(&self, request: FetchRequest) -> FetchFuture {
        let url = request.url.clone();
        let started = self.clock.now_ms();
        let call = self.original.fetch(request);

        let clock = self.clock.clone();
        let history = self.history.clone();
        let emitter = self.emitter.clone();
        async move {
            let outcome = call.await;
            if emitter.is_alive() {
                let record = NetworkRecord {
                    url,
                    status: outcome.as_ref().map(|r| r.status).unwrap_or(0),
                    duration_ms: (clock.now_ms() - started).max(0.0),
                    timestamp: epoch_ms(),
                };
                // Held across the emit so consumers see completion order.
                let mut history = lock(&history);
                history.push(record);
                emitter.emit(history.newest_first());
            }
            outcome
        }
        .boxed()
    }
}

impl Collector for CallInterceptor {
    type Update = Vec<NetworkRecord>;

    fn start<F>(&self, on_update: F) -> StopHandle
    where
        F: FnMut(Vec<NetworkRecord>) + Send + 'static,
    {
        let emitter = Emitter::new(on_update);
        let history = Arc::new(Mutex::new(NetworkHistory::new(self.capacity)));

        let clock = self.clock.clone();
        let wrapper_emitter = emitter.clone();
        let lease = self.slot.lease(move |original| -> SharedFetch {
            Arc::new(InterceptingFetch {
                original,
                clock,
                history,
                emitter: wrapper_emitter,
            })
        });

        debug!(capacity = self.capacity, "call interceptor started");

        let slot = self.slot.clone();
        StopHandle::new("network", emitter).on_stop(move || slot.release(lease))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str) -> NetworkRecord {
        NetworkRecord {
            url: url.to_string(),
            status: 200,
            duration_ms: 1.0,
            timestamp: 0,
        }
    }

    #[test]
    fn history_is_newest_first_and_bounded() {
        let mut history = NetworkHistory::new(3);
        for url in ["a", "b", "c", "d"] {
            history.push(record(url));
        }
        let urls: Vec<String> = history.newest_first().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["d", "c", "b"]);
    }
}
