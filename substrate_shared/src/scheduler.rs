//! Frame scheduler.
//!
//! A single control object drives update/render callbacks once per tick; no
//! recursive self-scheduling. The per-tick algorithm is exposed as
//! [`GameLoop::tick_at`] so tests can feed fabricated timestamps, while
//! [`GameLoop::run`] paces real time with the tokio clock.
//!
//! Callback failures are isolated: an error from one callback is routed to
//! the error handler and never prevents the remaining callbacks of either
//! phase, nor stops the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Large frame gaps (tab backgrounding, debugger stops) are clamped to this
/// delta so simulation never leaps.
pub const MAX_DELTA: Duration = Duration::from_millis(200);

const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Paused,
}

/// Handle returned by callback registration; feeds the matching `remove_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Clonable signal for requesting a stop from inside a running callback.
/// The loop honors it at the end of the current frame, so no callback
/// already in flight is re-entered or cut short.
#[derive(Clone, Default)]
pub struct LoopSignal {
    stop: Arc<AtomicBool>,
}

impl LoopSignal {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

type UpdateCallback = Box<dyn FnMut(f32) -> anyhow::Result<()> + Send>;
type RenderCallback = Box<dyn FnMut() -> anyhow::Result<()> + Send>;
type ErrorHandler = Box<dyn FnMut(&anyhow::Error) + Send>;

/// Time-stepped callback driver with pause/resume and rate limiting.
pub struct GameLoop {
    state: LoopState,
    updates: Vec<(CallbackId, UpdateCallback)>,
    renders: Vec<(CallbackId, RenderCallback)>,
    next_callback_id: u64,

    last_time: Option<Instant>,
    paused_at: Option<Instant>,
    max_frame_rate: Option<f64>,

    error_handler: Option<ErrorHandler>,
    signal: LoopSignal,

    // Rolling FPS, refreshed once per second.
    fps: f64,
    frames_in_window: u32,
    window_start: Option<Instant>,
}

impl Default for GameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl GameLoop {
    pub fn new() -> Self {
        Self {
            state: LoopState::Idle,
            updates: Vec::new(),
            renders: Vec::new(),
            next_callback_id: 0,
            last_time: None,
            paused_at: None,
            max_frame_rate: None,
            error_handler: None,
            signal: LoopSignal::default(),
            fps: 0.0,
            frames_in_window: 0,
            window_start: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Rolling frames-per-second, refreshed once per second of running time.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Signal handle for stopping the loop from within a callback.
    pub fn signal(&self) -> LoopSignal {
        self.signal.clone()
    }

    /// Registers a per-frame update callback, invoked with delta-time
    /// seconds in registration order.
    pub fn add_update_callback(
        &mut self,
        f: impl FnMut(f32) -> anyhow::Result<()> + Send + 'static,
    ) -> CallbackId {
        let id = CallbackId(self.next_callback_id);
        self.next_callback_id += 1;
        self.updates.push((id, Box::new(f)));
        id
    }

    /// Registers a per-frame render callback, invoked after all updates.
    pub fn add_render_callback(
        &mut self,
        f: impl FnMut() -> anyhow::Result<()> + Send + 'static,
    ) -> CallbackId {
        let id = CallbackId(self.next_callback_id);
        self.next_callback_id += 1;
        self.renders.push((id, Box::new(f)));
        id
    }

    /// Deregisters an update callback. Idempotent; safe after `stop`.
    pub fn remove_update_callback(&mut self, id: CallbackId) -> bool {
        let before = self.updates.len();
        self.updates.retain(|(cid, _)| *cid != id);
        self.updates.len() != before
    }

    /// Deregisters a render callback. Idempotent; safe after `stop`.
    pub fn remove_render_callback(&mut self, id: CallbackId) -> bool {
        let before = self.renders.len();
        self.renders.retain(|(cid, _)| *cid != id);
        self.renders.len() != before
    }

    /// Caps the frame rate; ticks arriving earlier than `1/fps` are skipped
    /// without invoking callbacks. `None` removes the cap.
    pub fn set_max_frame_rate(&mut self, fps: Option<f64>) {
        match fps {
            Some(v) if !v.is_finite() || v <= 0.0 => {
                warn!(fps = v, "ignoring invalid max frame rate");
            }
            other => self.max_frame_rate = other,
        }
    }

    /// Routes callback errors to `f` instead of the default `warn!` log.
    pub fn set_error_handler(&mut self, f: impl FnMut(&anyhow::Error) + Send + 'static) {
        self.error_handler = Some(Box::new(f));
    }

    /// Transitions `Idle -> Running` and initializes the frame clock.
    /// No-op when already running or paused.
    pub fn start(&mut self, run_first_frame_immediately: bool) {
        self.start_at(Instant::now(), run_first_frame_immediately);
    }

    /// [`start`](Self::start) with an explicit clock origin.
    pub fn start_at(&mut self, now: Instant, run_first_frame_immediately: bool) {
        if self.state != LoopState::Idle {
            debug!(state = ?self.state, "start ignored, loop not idle");
            return;
        }
        self.state = LoopState::Running;
        self.last_time = Some(now);
        self.window_start = Some(now);
        self.frames_in_window = 0;
        if run_first_frame_immediately {
            self.run_frame(0.0);
            self.finish_frame();
        }
    }

    /// Transitions to `Idle` and clears both callback lists: a stopped loop
    /// has no registered work, callers re-register after a restart. Safe to
    /// call twice.
    pub fn stop(&mut self) {
        self.state = LoopState::Idle;
        self.updates.clear();
        self.renders.clear();
        self.last_time = None;
        self.paused_at = None;
        self.fps = 0.0;
        self.frames_in_window = 0;
        self.window_start = None;
    }

    /// Suspends ticking without touching the callback lists.
    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn pause_at(&mut self, now: Instant) {
        if self.state != LoopState::Running {
            return;
        }
        self.state = LoopState::Paused;
        self.paused_at = Some(now);
    }

    /// Resumes ticking. The frame clock is shifted forward by exactly the
    /// paused duration, so the next delta is not inflated by pause time.
    pub fn resume(&mut self) {
        self.resume_at(Instant::now());
    }

    pub fn resume_at(&mut self, now: Instant) {
        if self.state != LoopState::Paused {
            return;
        }
        if let (Some(last), Some(paused_at)) = (self.last_time, self.paused_at) {
            let paused_for = now.saturating_duration_since(paused_at);
            self.last_time = Some(last + paused_for);
        }
        self.paused_at = None;
        self.state = LoopState::Running;
    }

    /// One tick of the per-frame algorithm at timestamp `now`.
    ///
    /// Returns the delta-time (seconds) reported to update callbacks, or
    /// `None` when the frame was skipped (idle, paused, or rate-limited).
    pub fn tick_at(&mut self, now: Instant) -> Option<f32> {
        if self.state != LoopState::Running {
            return None;
        }
        let last = match self.last_time {
            Some(t) => t,
            None => {
                self.last_time = Some(now);
                return None;
            }
        };

        let elapsed = now.saturating_duration_since(last);
        if let Some(fps) = self.max_frame_rate {
            let min_interval = Duration::from_secs_f64(1.0 / fps);
            if elapsed < min_interval {
                return None;
            }
        }

        let dt = elapsed.min(MAX_DELTA).as_secs_f32();
        self.last_time = Some(now);

        self.run_frame(dt);
        self.update_fps(now);
        self.finish_frame();
        Some(dt)
    }

    /// Paces the loop on the tokio clock until it leaves Running/Paused.
    pub async fn run(&mut self) {
        let mut next = tokio::time::Instant::now();
        loop {
            if self.state == LoopState::Idle {
                break;
            }
            let interval = self
                .max_frame_rate
                .map(|fps| Duration::from_secs_f64(1.0 / fps))
                .unwrap_or(DEFAULT_FRAME_INTERVAL);
            next += interval;
            tokio::time::sleep_until(next).await;
            self.tick_at(Instant::now());
        }
    }

    fn run_frame(&mut self, dt: f32) {
        for (_, f) in self.updates.iter_mut() {
            if let Err(e) = f(dt) {
                match &mut self.error_handler {
                    Some(handler) => handler(&e),
                    None => warn!(error = %e, "update callback failed"),
                }
            }
        }
        for (_, f) in self.renders.iter_mut() {
            if let Err(e) = f() {
                match &mut self.error_handler {
                    Some(handler) => handler(&e),
                    None => warn!(error = %e, "render callback failed"),
                }
            }
        }
    }

    fn finish_frame(&mut self) {
        if self.signal.stop.swap(false, Ordering::SeqCst) {
            self.stop();
        }
    }

    fn update_fps(&mut self, now: Instant) {
        self.frames_in_window += 1;
        let start = match self.window_start {
            Some(t) => t,
            None => {
                self.window_start = Some(now);
                return;
            }
        };
        let window = now.saturating_duration_since(start);
        if window >= Duration::from_secs(1) {
            self.fps = self.frames_in_window as f64 / window.as_secs_f64();
            self.frames_in_window = 0;
            self.window_start = Some(now);
        }
    }
}
