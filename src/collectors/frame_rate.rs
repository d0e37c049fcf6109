use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::Collector;
use crate::config::DEFAULT_FRAME_WINDOW_MS;
use crate::kernel::lifecycle::{lock, Emitter, StopHandle};
use crate::kernel::time::Clock;
use crate::platform::frame::{FrameScheduler, FrameToken};

const MIN_WINDOW_MS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRateSample {
    pub fps: u32,
}

/// Measures paint cadence by counting frames over a measurement window.
///
/// The rate is always actual frames over actual elapsed time, so it stays
/// correct under throttling or variable refresh rates.
pub struct FrameRateSampler {
    scheduler: Arc<dyn FrameScheduler>,
    clock: Arc<dyn Clock>,
    window_ms: f64,
}

impl FrameRateSampler {
    pub fn new(scheduler: Arc<dyn FrameScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            scheduler,
            clock,
            window_ms: DEFAULT_FRAME_WINDOW_MS as f64,
        }
    }

    /// Windows shorter than one millisecond are raised to one millisecond.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_ms = (window.as_secs_f64() * 1000.0).max(MIN_WINDOW_MS);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopPhase {
    Running,
    Stopped,
}

struct LoopState {
    phase: LoopPhase,
    frames: u32,
    window_start: f64,
    pending: Option<FrameToken>,
}

struct FrameLoop {
    scheduler: Arc<dyn FrameScheduler>,
    clock: Arc<dyn Clock>,
    window_ms: f64,
    emitter: Arc<Emitter<FrameRateSample>>,
    state: Mutex<LoopState>,
}

impl FrameLoop {
    fn schedule(self: &Arc<Self>, state: &mut LoopState) {
        let this = Arc::clone(self);
        let token = self.scheduler.request_frame(Box::new(move |_| this.on_frame()));
        state.pending = Some(token);
    }

    fn on_frame(self: Arc<Self>) {
        let sample = {
            let mut state = lock(&self.state);
            // A callback queued before stop() may still fire once.
            if state.phase == LoopPhase::Stopped || !self.emitter.is_alive() {
                return;
            }
            state.pending = None;
            state.frames += 1;

            let now = self.clock.now_ms();
            let elapsed = now - state.window_start;
            let sample = if elapsed >= self.window_ms {
                let fps = (state.frames as f64 * 1000.0 / elapsed).round() as u32;
                state.frames = 0;
                state.window_start = now;
                Some(FrameRateSample { fps })
            } else {
                None
            };

            self.schedule(&mut state);
            sample
        };

        if let Some(sample) = sample {
            self.emitter.emit(sample);
        }
    }

    fn halt(&self) {
        let mut state = lock(&self.state);
        state.phase = LoopPhase::Stopped;
        if let Some(token) = state.pending.take() {
            self.scheduler.cancel_frame(token);
        }
    }
}

impl Collector for FrameRateSampler {
    type Update = FrameRateSample;

    fn start<F>(&self, on_update: F) -> StopHandle
    where
        F: FnMut(FrameRateSample) + Send + 'static,
    {
        let emitter = Emitter::new(on_update);
        let frame_loop = Arc::new(FrameLoop {
            scheduler: self.scheduler.clone(),
            clock: self.clock.clone(),
            window_ms: self.window_ms,
            emitter: emitter.clone(),
            state: Mutex::new(LoopState {
                phase: LoopPhase::Running,
                frames: 0,
                window_start: self.clock.now_ms(),
                pending: None,
            }),
        });

        {
            let mut state = lock(&frame_loop.state);
            frame_loop.schedule(&mut state);
        }
        debug!(window_ms = self.window_ms, "frame rate sampler started");

        StopHandle::new("frame_rate", emitter).on_stop(move || frame_loop.halt())
    }
}
