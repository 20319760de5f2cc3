use std::time::Instant;

/// Snapshot of the time state sampled at the start of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or simulated time in seconds.
    pub seconds: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(seconds: f32, frame_index: u64) -> Self {
        Self {
            seconds,
            frame_index,
        }
    }
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
    frame: u64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            frame: 0,
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let elapsed = self.origin.elapsed();
        let sample = TimeSample::new(elapsed.as_secs_f32(), self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Time source that advances by a fixed step per frame.
///
/// Used for headless runs and tests, where frame pacing has to be
/// reproducible regardless of how fast the host executes.
#[derive(Debug, Clone, Copy)]
pub struct SteppedTimeSource {
    step: f32,
    frame: u64,
}

impl SteppedTimeSource {
    pub fn new(step_seconds: f32) -> Self {
        Self {
            step: step_seconds.max(0.0),
            frame: 0,
        }
    }

    /// Steps at the given frames-per-second rate.
    pub fn at_fps(fps: f32) -> Self {
        Self::new(if fps > 0.0 { 1.0 / fps } else { 0.0 })
    }
}

impl TimeSource for SteppedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.frame as f32 * self.step, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Convenient alias for owning time sources behind trait objects.
pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Per-renderer stopwatch measured against the frame clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    started_at: Option<f32>,
    accumulated: f32,
}

impl Clock {
    pub fn start(&mut self, now: f32) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn stop(&mut self, now: f32) {
        if let Some(started) = self.started_at.take() {
            self.accumulated += (now - started).max(0.0);
        }
    }

    /// Seconds accumulated while running, including the current run.
    pub fn elapsed(&self, now: f32) -> f32 {
        let running = self
            .started_at
            .map(|started| (now - started).max(0.0))
            .unwrap_or(0.0);
        self.accumulated + running
    }
}
