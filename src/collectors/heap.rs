use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Collector;
use crate::config::DEFAULT_HEAP_INTERVAL_MS;
use crate::kernel::lifecycle::{Emitter, StopHandle};
use crate::platform::heap::{HeapIntrospector, HeapUsage};

const BYTES_PER_MB: f64 = 1_048_576.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeapSample {
    pub used_mb: f64,
    pub limit_mb: f64,
}

impl From<HeapUsage> for HeapSample {
    fn from(usage: HeapUsage) -> Self {
        Self {
            used_mb: usage.used_bytes as f64 / BYTES_PER_MB,
            limit_mb: usage.limit_bytes.max(usage.used_bytes) as f64 / BYTES_PER_MB,
        }
    }
}

/// Polls the heap capability on a fixed interval. The capability is queried
/// on every tick; `None` is emitted whenever it is absent.
pub struct HeapSampler {
    introspector: Arc<dyn HeapIntrospector>,
    interval: Duration,
}

impl HeapSampler {
    pub fn new(introspector: Arc<dyn HeapIntrospector>) -> Self {
        Self {
            introspector,
            interval: Duration::from_millis(DEFAULT_HEAP_INTERVAL_MS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Collector for HeapSampler {
    type Update = Option<HeapSample>;

    /// Polls on the current tokio runtime; the first sample arrives one interval
    /// after start. Outside a runtime nothing is polled and the returned handle
    /// is already stopped.
    fn start<F>(&self, on_update: F) -> StopHandle
    where
        F: FnMut(Option<HeapSample>) + Send + 'static,
    {
        let emitter = Emitter::new(on_update);
        let Ok(runtime) = Handle::try_current() else {
            warn!("heap sampler needs a tokio runtime; not polling");
            let handle = StopHandle::new("heap", emitter);
            handle.stop();
            return handle;
        };
        let cancel = CancellationToken::new();

        let introspector = self.introspector.clone();
        let period = self.interval;
        let task_emitter = emitter.clone();
        let task_cancel = cancel.clone();
        debug!(interval_ms = period.as_millis() as u64, "heap sampler started");
        runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let sample = introspector.heap_usage().map(HeapSample::from);
                        if !task_emitter.emit(sample) {
                            break;
                        }
                    }
                }
            }
        });

        StopHandle::new("heap", emitter).on_stop(move || cancel.cancel())
    }
}
